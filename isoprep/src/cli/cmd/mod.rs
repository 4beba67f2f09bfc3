pub mod answer;
pub mod build;
pub mod inspect;

#[derive(clap::Subcommand, Debug, Clone)]
pub enum Commands {
    /// Build an unattended installer image
    Build {
        /// The output image (defaults to the configured output, or a
        /// timestamped copy next to the source)
        #[clap(long)]
        output: Option<String>,

        /// Log at debug level
        #[clap(long, num_args = 0)]
        debug: bool,

        /// The context directory (containing an isoprep config file)
        #[clap(index = 1)]
        path: String,
    },

    /// Print the answer file a build would bake into its image
    Answer {
        /// The context directory (containing an isoprep config file)
        #[clap(index = 1)]
        path: String,
    },

    /// List the contents of an image
    Inspect {
        /// The image to read
        #[clap(index = 1)]
        image: String,

        /// Read the UDF structures instead of ISO-9660
        #[clap(long, num_args = 0)]
        udf: bool,

        /// Read Joliet names alongside Rock Ridge
        #[clap(long, num_args = 0)]
        joliet: bool,
    },
}
