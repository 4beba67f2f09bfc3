use std::process::ExitCode;

use crate::answer::AnswerContent;
use tracing::error;

use super::build::load_config;

pub fn run(cmd: super::Commands) -> ExitCode {
    match cmd {
        super::Commands::Answer { path } => {
            let Some(config) = load_config(&path) else {
                return ExitCode::FAILURE;
            };

            match config.answer_file(path.as_ref()) {
                Ok(answer) => {
                    print!("{}", answer.serialize());
                    ExitCode::SUCCESS
                }
                Err(err) => {
                    error!(error = ?err, "Failed to generate answer file");
                    ExitCode::FAILURE
                }
            }
        }
        _ => ExitCode::FAILURE,
    }
}
