//! Command line argument and config file tools.

use std::ffi::OsString;

use clap::{Arg, ArgAction, ArgMatches, Command, Parser};
use serde::de::DeserializeOwned;
use snafu::{ResultExt as _, Snafu};

use crate::{config::Config, ServiceInfo};

const GENERATE_CONFIG_OPT_ID: &str = "generate";
const USE_CONFIG_OPT_ID: &str = "config";

/// Default generic argument for `Cli` to be used when you do not need custom CLI arguments.
#[derive(clap::Parser)]
pub struct NoArguments {}

/// Command line errors
#[derive(Debug, Snafu)]
pub enum Error {
    /// The command line did not match the expected arguments
    #[snafu(display("Could not parse arguments: {message}"))]
    ArgParse {
        /// clap's rendering of the problem
        message: String,
    },

    /// The sample config file could not be generated
    #[snafu(display("Could not generate the config file: {source}"))]
    Generate {
        /// The config error
        source: crate::Error,
    },

    /// The config file could not be loaded
    #[snafu(display("{source}"))]
    Load {
        /// The config error
        source: crate::Error,
    },
}

/// Cli is used to parse command line arguments, generate and load config files.
pub struct Cli<C, A = NoArguments> {
    /// parsed command line arguments
    pub args: A,

    /// parsed TOML config file with the structure of `C`
    pub config: C,
}

impl<C, A> Cli<C, A>
where
    A: Parser,
    C: DeserializeOwned + doku::Document,
{
    /// Parse command line arguments, generate or load the config file, and apply config overrides from environment variables with `env_prefix`.
    ///
    /// Exits the process after generating a config file, and on any error.
    pub fn new(service_info: &ServiceInfo, env_prefix: impl AsRef<str>) -> Self {
        let arg_matches = Self::command(service_info).get_matches();
        match Self::from_matches(arg_matches, env_prefix.as_ref()) {
            Ok(Some(cli)) => cli,
            Ok(None) => std::process::exit(0),
            Err(err) => {
                eprintln!("{err}");
                std::process::exit(1);
            }
        }
    }

    /// Like [`Cli::new`], but parses `args` (including the binary name) and
    /// reports errors instead of exiting.
    ///
    /// Returns `Ok(None)` when `--generate` wrote a config file.
    pub fn try_parse_from<I, T>(
        service_info: &ServiceInfo,
        env_prefix: impl AsRef<str>,
        args: I,
    ) -> Result<Option<Self>, Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let arg_matches = Self::command(service_info)
            .try_get_matches_from(args)
            .map_err(|err| Error::ArgParse {
                message: err.to_string(),
            })?;
        Self::from_matches(arg_matches, env_prefix.as_ref())
    }

    fn command(service_info: &ServiceInfo) -> Command {
        let arg_command = A::command();

        Command::new(service_info.name)
            .version(service_info.version)
            .author(service_info.author)
            .about(
                arg_command
                    .get_about()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| service_info.description.to_owned()),
            )
            .args(arg_command.get_arguments())
            .arg(
                Arg::new(USE_CONFIG_OPT_ID)
                    .required_unless_present(GENERATE_CONFIG_OPT_ID)
                    .action(ArgAction::Set)
                    .long("config")
                    .short('c')
                    .help("Specifies the toml config file to run the service with"),
            )
            .arg(
                Arg::new(GENERATE_CONFIG_OPT_ID)
                    .action(ArgAction::Set)
                    .long("generate")
                    .short('g')
                    .help("Generates a new default toml config file for the service"),
            )
    }

    fn from_matches(mut arg_matches: ArgMatches, env_prefix: &str) -> Result<Option<Self>, Error> {
        if let Some(path) = arg_matches.remove_one::<String>(GENERATE_CONFIG_OPT_ID) {
            crate::config::create_config_file::<C>(path).context(GenerateSnafu)?;
            return Ok(None);
        }

        let Some(config_path) = arg_matches.remove_one::<String>(USE_CONFIG_OPT_ID) else {
            return ArgParseSnafu {
                message: "--config is required",
            }
            .fail();
        };

        let args = A::from_arg_matches_mut(&mut arg_matches).map_err(|err| Error::ArgParse {
            message: err.to_string(),
        })?;

        let config = Config::new(Some(config_path), Some(env_prefix))
            .context(LoadSnafu)?
            .config;

        Ok(Some(Self { args, config }))
    }
}
