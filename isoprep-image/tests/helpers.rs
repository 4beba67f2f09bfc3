#![cfg(unix)]
//! The helper-backed reader and writer driven through shell scripts that
//! stand in for `isoinfo`, `7z` and `genisoimage`.

use std::{
    fs,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
};

use isoprep_image::{
    CloneOptions, Error, HelperReader, HelperWriter, Modification, OpticalImage, ReadImage,
    ReadOptions, WriteImage, WriteOptions, clone_with_modifications,
};

// Executing a script while another thread holds it open for writing fails
// with ETXTBSY
static SHIMS: Mutex<()> = Mutex::new(());

fn lock() -> MutexGuard<'static, ()> {
    SHIMS.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn shim(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}")).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn image(dir: &Path) -> OpticalImage {
    let path = dir.join("source.iso");
    fs::write(&path, b"iso").unwrap();
    OpticalImage::new(path).unwrap()
}

fn udf_reader(sevenzip: PathBuf) -> HelperReader {
    HelperReader {
        isoinfo: PathBuf::from("isoinfo"),
        sevenzip: Some(sevenzip),
    }
}

const SEVENZIP_CHATTY: &str = r#"echo "$@" > "$(dirname "$0")/7z.args"
echo "" >&2
echo "7-Zip [64] 16.02 : Copyright (c) 1999-2016 Igor Pavlov : 2016-05-21" >&2
echo "p7zip Version 16.02 (locale=C,Utf16=off,HugeFiles=on,64 bits,4 CPUs)" >&2
echo "Extracting archive: $4" >&2
echo "Everything is Ok" >&2
printf DATA
"#;

#[test_log::test]
fn test_7z_banner_on_stderr_is_not_a_failure() {
    let _guard = lock();
    let tmp = tempfile::tempdir().unwrap();
    let reader = udf_reader(shim(tmp.path(), "7z", SEVENZIP_CHATTY));
    let dest = tmp.path().join("out/sources/boot.wim");

    reader
        .extract(&image(tmp.path()), "sources/boot.wim", &dest, &ReadOptions::udf())
        .unwrap();

    assert_eq!(fs::read(&dest).unwrap(), b"DATA");
    let args = fs::read_to_string(tmp.path().join("7z.args")).unwrap();
    assert!(args.starts_with("e -so -bso0 -bsp0 -tudf "));
    assert!(args.trim_end().ends_with(" sources/boot.wim"));
}

#[test_log::test]
fn test_7z_error_fails_extraction() {
    let _guard = lock();
    let tmp = tempfile::tempdir().unwrap();
    let source = image(tmp.path());
    let dest = tmp.path().join("install.wim");

    // Exit status zero, but the entry was not transcribed
    let reader = udf_reader(shim(
        tmp.path(),
        "7z-silent",
        "printf PART\necho 'ERROR: Data Error : sources/install.wim' >&2\n",
    ));
    let result = reader.extract(&source, "sources/install.wim", &dest, &ReadOptions::udf());
    match result {
        Err(Error::Helper { program, message, .. }) => {
            assert_eq!(program, "7z");
            assert!(message.contains("Data Error"));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(!dest.exists());

    let reader = udf_reader(shim(
        tmp.path(),
        "7z-exit",
        "echo 'Can not open the file as archive' >&2\nexit 2\n",
    ));
    let result = reader.extract(&source, "sources/install.wim", &dest, &ReadOptions::udf());
    assert!(matches!(result, Err(Error::Helper { .. })));
    assert!(!dest.exists());
}

const ISOINFO: &str = r#"for arg; do last=$arg; done
case "$*" in
*" -x "*)
    printf 'content of %s\n' "$last"
    ;;
*" -l"*)
    cat <<'LISTING'
Directory listing of /
dr-xr-xr-x   1    0    0            2048 Feb  9 2023 [     20 02]  .
dr-xr-xr-x   1    0    0            2048 Feb  9 2023 [     20 02]  ..
dr-xr-xr-x   1    0    0            2048 Feb  9 2023 [     27 02]  isolinux
lr-xr-xr-x   1    0    0               0 Feb  9 2023 [      0 00]  ubuntu -> .

Directory listing of /isolinux/
dr-xr-xr-x   1    0    0            2048 Feb  9 2023 [     27 02]  .
dr-xr-xr-x   1    0    0            2048 Feb  9 2023 [     20 02]  ..
-r--r--r--   1    0    0              33 Feb  9 2023 [   1530 00]  isolinux.cfg
LISTING
    ;;
esac
"#;

/// Records the staged tree in the output image, warning like genisoimage
/// does about its own rc file.
const GENISOIMAGE: &str = r#"while [ $# -gt 1 ]; do
    if [ "$1" = "-o" ]; then out=$2; fi
    shift
done
cd "$1" || exit 1
{
    echo links
    find . -type l | sort
    echo files
    find . -type f | sort
    cat isolinux/isolinux.cfg
} > "$out"
echo "genisoimage: Warning: invalid configuration parameter 'PUBL' in /etc/genisoimage.conf" >&2
"#;

#[test_log::test]
fn test_clone_through_helpers() {
    let _guard = lock();
    let tmp = tempfile::tempdir().unwrap();
    let reader = HelperReader {
        isoinfo: shim(tmp.path(), "isoinfo", ISOINFO),
        sevenzip: None,
    };
    let writer = HelperWriter {
        program: shim(tmp.path(), "genisoimage", GENISOIMAGE),
    };
    let dest = tmp.path().join("out.iso");

    clone_with_modifications(
        &image(tmp.path()),
        &[
            Modification::from_string("isolinux/ks.cfg", "install\n"),
            Modification::by_regex("isolinux/isolinux.cfg", "^content", "changed").require_match(),
        ],
        Some(&dest),
        &CloneOptions {
            read: ReadOptions::default(),
            write: WriteOptions::default().with_label("SHIM"),
            read_tolerance: 0.0,
        },
        &reader,
        &writer,
    )
    .unwrap();

    assert_eq!(
        fs::read_to_string(&dest).unwrap(),
        "links\n./ubuntu\nfiles\n./isolinux/isolinux.cfg\n./isolinux/ks.cfg\nchanged of /isolinux/isolinux.cfg\n"
    );
    assert!(!tmp.path().join("out.iso.tmpdir").exists());
}

#[test_log::test]
fn test_writer_nonzero_exit() {
    let _guard = lock();
    let tmp = tempfile::tempdir().unwrap();
    let writer = HelperWriter {
        program: shim(
            tmp.path(),
            "genisoimage",
            "echo 'genisoimage: No space left on device' >&2\nexit 1\n",
        ),
    };
    let staging = tempfile::tempdir().unwrap();

    let result = writer.write(
        staging.path(),
        &tmp.path().join("out.iso"),
        &WriteOptions::default(),
    );
    match result {
        Err(Error::WriteFailure { status, stderr }) => {
            assert_eq!(status, "exit code 1");
            assert!(stderr.contains("No space left"));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test_log::test]
fn test_writer_stderr_and_missing_output() {
    let _guard = lock();
    let tmp = tempfile::tempdir().unwrap();
    let staging = tempfile::tempdir().unwrap();
    let dest = tmp.path().join("out.iso");

    // Zero exit with a complaint that is not a known benign warning
    let writer = HelperWriter {
        program: shim(
            tmp.path(),
            "genisoimage-complains",
            "echo \"genisoimage: Uh oh, I cant find the boot image 'boot.bin' !\" >&2\n",
        ),
    };
    let result = writer.write(staging.path(), &dest, &WriteOptions::default());
    assert!(matches!(result, Err(Error::WriteFailure { .. })));

    // Zero exit, quiet, but no image
    let writer = HelperWriter {
        program: shim(tmp.path(), "genisoimage-quiet", "exit 0\n"),
    };
    let result = writer.write(staging.path(), &dest, &WriteOptions::default());
    assert!(matches!(result, Err(Error::PostCondition(_))));
}
