//! Command line definition
//!
//! The static options are declared with clap's derive API. Options a site
//! declares are added to the same command at run time, so they only exist
//! once the site is known.

use anyhow::Result;
use clap::{Arg, ArgMatches, CommandFactory, FromArgMatches, Parser};
use kiln_build::{BuildOptions, Host, SiteOption, SiteTarget};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::warn;

/// Build orchestration for multi-repository Fortran and C codebases.
///
/// Fetches the configured sources, preprocesses, analyses, compiles and links
/// them with the compilers and flag profiles of the chosen site.
///
/// EXAMPLES:
///     kiln                                   Build the project in this directory
///     kiln --profile production --nprocs 8   Optimised parallel build
///     kiln --site nci --platform gadi        Use a site configuration
///     kiln -s nci -p gadi -pro production    The same with short options
///     kiln --suite intel-classic --no-mpi    Serial Intel build
///     kiln --openacc --host gpu              OpenACC offload to the GPU
///     kiln --available-compilers             List usable compilers and linkers
///
/// ENVIRONMENT VARIABLES:
///     SITE, PLATFORM    Site target when --site/--platform are not given
///     FC, CC, LD        Compilers and linker when --suite is not given
///     KILN_PROFILE      Profile when --profile is not given
///     KILN_NPROCS       Worker count when --nprocs is not given
///     RUST_LOG          Log filter, e.g. kiln_build=debug
#[derive(Parser, Debug)]
#[command(name = "kiln")]
#[command(version)]
pub struct Cli {
    /// Site name
    #[arg(long, short = 's')]
    pub site: Option<String>,

    /// Platform name
    #[arg(long, short = 'p')]
    pub platform: Option<String>,

    /// Compiler suite made default for every tool category (e.g. gnu, intel-classic)
    #[arg(long)]
    pub suite: Option<String>,

    /// List the available compilers and linkers, then exit
    #[arg(long)]
    pub available_compilers: bool,

    /// Fortran compiler, by tool or executable name
    #[arg(long)]
    pub fc: Option<String>,

    /// C compiler, by tool or executable name
    #[arg(long)]
    pub cc: Option<String>,

    /// Linker, by tool or executable name
    #[arg(long)]
    pub ld: Option<String>,

    /// Extra Fortran compiler flags
    #[arg(long, allow_hyphen_values = true)]
    pub fflags: Option<String>,

    /// Extra C compiler flags
    #[arg(long, allow_hyphen_values = true)]
    pub cflags: Option<String>,

    /// Extra linker flags
    #[arg(long, allow_hyphen_values = true)]
    pub ldflags: Option<String>,

    /// Number of worker processes
    #[arg(long, short = 'n', value_parser = clap::value_parser!(usize))]
    pub nprocs: Option<usize>,

    /// Build with MPI (default)
    #[arg(long, overrides_with = "no_mpi")]
    #[allow(dead_code)]
    pub mpi: bool,

    /// Build without MPI
    #[arg(long)]
    pub no_mpi: bool,

    /// Build with OpenMP (default)
    #[arg(long, overrides_with = "no_openmp")]
    #[allow(dead_code)]
    pub openmp: bool,

    /// Build without OpenMP
    #[arg(long)]
    pub no_openmp: bool,

    /// Build with OpenACC
    #[arg(long, overrides_with = "no_openacc")]
    pub openacc: bool,

    /// Build without OpenACC (default)
    #[arg(long)]
    #[allow(dead_code)]
    pub no_openacc: bool,

    /// Where OpenMP or OpenACC regions run
    #[arg(long, default_value = "cpu", value_parser = parse_host)]
    pub host: Host,

    /// Flag profile; the site's first profile when not given (also -pro)
    #[arg(long, visible_alias = "pro")]
    pub profile: Option<String>,

    /// Project directory or kiln.toml (defaults to the current directory)
    #[arg(long)]
    pub project: Option<PathBuf>,

    /// Directory holding the build workspaces
    #[arg(long)]
    pub workspace: Option<PathBuf>,

    /// Remove cache entries the build did not use
    #[arg(long)]
    pub clean_cache: bool,

    /// Verbose output
    #[arg(long, short = 'v', conflicts_with = "quiet")]
    pub verbose: bool,

    /// Quiet output (warnings and errors only)
    #[arg(long, short = 'q')]
    pub quiet: bool,

    /// Print the build summary as JSON
    #[arg(long, env = "KILN_JSON")]
    pub json: bool,
}

/// Parsed command line plus the values of site-declared options
#[derive(Debug)]
pub struct Invocation {
    pub cli: Cli,
    pub extra: BTreeMap<String, String>,
}

impl Cli {
    /// Parse `args`, accepting the options `site_options` declares
    ///
    /// Site options clashing with a built-in option are skipped.
    pub fn parse_with_site_options(args: &[String], site_options: &[SiteOption]) -> Result<Invocation> {
        let mut command = Self::command();
        let mut declared = Vec::new();

        for option in site_options {
            let clashes = command
                .get_arguments()
                .any(|arg| arg.get_long() == Some(option.name.as_str()) || arg.get_id() == option.name.as_str());
            if clashes {
                warn!(option = %option.name, "site option clashes with a built-in option, ignoring");
                continue;
            }

            let mut arg = Arg::new(option.name.clone())
                .long(option.name.clone())
                .help(option.help.clone())
                .allow_hyphen_values(true);
            if let Some(default) = &option.default {
                arg = arg.default_value(default.clone());
            }
            command = command.arg(arg);
            declared.push(option.name.clone());
        }

        let matches = command.get_matches_from(args);
        let cli = Self::from_arg_matches(&matches)?;
        let extra = site_values(&matches, &declared);
        Ok(Invocation { cli, extra })
    }

    pub fn mpi(&self) -> bool {
        !self.no_mpi
    }

    pub fn openmp(&self) -> bool {
        !self.no_openmp
    }

    /// Options for the build; unset values fall back to the project and global config
    pub fn build_options(
        &self,
        target: &SiteTarget,
        extra: BTreeMap<String, String>,
        config: &kiln_config::Config,
    ) -> BuildOptions {
        let mut options = BuildOptions::new();
        options.site = target.site.clone();
        options.platform = target.platform.clone();
        options.profile = self.profile.clone().or_else(|| config.project.profile().map(str::to_string));
        options.suite = self
            .suite
            .clone()
            .or_else(|| config.global.default_suite().map(str::to_string));
        options.fc = self.fc.clone();
        options.cc = self.cc.clone();
        options.ld = self.ld.clone();
        options.fflags = split_flags(self.fflags.as_deref());
        options.cflags = split_flags(self.cflags.as_deref());
        options.ldflags = split_flags(self.ldflags.as_deref());
        options.nprocs = self
            .nprocs
            .or_else(|| config.project.nprocs())
            .or_else(|| config.global.default_nprocs());
        options.mpi = self.mpi();
        options.openmp = self.openmp();
        options.openacc = self.openacc;
        options.host = self.host;
        options.extra = extra;
        options
    }
}

fn parse_host(value: &str) -> std::result::Result<Host, String> {
    Host::from_str(value).map_err(|e| e.to_string())
}

/// Single-dash long options accepted for compatibility, with their long form
const SINGLE_DASH_LONGS: &[(&str, &str)] = &[("-pro", "--profile")];

/// `args` with single-dash long options rewritten to their `--` form
///
/// Clap reads `-pro` as `-p ro`, so these are rewritten before parsing.
pub fn normalize_args(args: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(args.len());
    let mut passthrough = false;
    for (i, arg) in args.iter().enumerate() {
        if i == 0 || passthrough {
            out.push(arg.clone());
            continue;
        }
        if arg == "--" {
            passthrough = true;
            out.push(arg.clone());
            continue;
        }
        let rewritten = SINGLE_DASH_LONGS.iter().find_map(|(short, long)| {
            if arg == short {
                Some(long.to_string())
            } else {
                arg.strip_prefix(short)
                    .and_then(|rest| rest.strip_prefix('='))
                    .map(|value| format!("{}={}", long, value))
            }
        });
        out.push(rewritten.unwrap_or_else(|| arg.clone()));
    }
    out
}

fn site_values(matches: &ArgMatches, declared: &[String]) -> BTreeMap<String, String> {
    declared
        .iter()
        .filter_map(|name| {
            matches
                .get_one::<String>(name)
                .map(|value| (name.clone(), value.clone()))
        })
        .collect()
}

fn split_flags(flags: Option<&str>) -> Vec<String> {
    flags
        .map(|f| f.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default()
}

/// Options whose value may look like another option
const FLAG_OPTIONS: &[&str] = &["--fflags", "--cflags", "--ldflags"];

/// Value of `--<name>` or its short form `-<c>` before full parsing
///
/// Accepts `--name value`, `--name=value`, `-c value`, `-c=value` and
/// `-cvalue`; the last occurrence wins. Used for the options that decide
/// which site options exist.
pub fn peek_option(args: &[String], name: &str, short: Option<char>) -> Option<String> {
    let long = format!("--{}", name);
    let long_prefix = format!("{}=", long);
    let short = short.map(|c| format!("-{}", c));
    let mut found = None;
    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        if arg == "--" {
            break;
        }
        if FLAG_OPTIONS.contains(&arg.as_str()) {
            // the value may start with a hyphen
            iter.next();
        } else if *arg == long || short.as_ref() == Some(arg) {
            found = iter.next().cloned();
        } else if let Some(value) = arg.strip_prefix(&long_prefix) {
            found = Some(value.to_string());
        } else if let Some(value) = short.as_deref().and_then(|s| arg.strip_prefix(s)) {
            if !arg.starts_with("--") {
                found = Some(value.strip_prefix('=').unwrap_or(value).to_string());
            }
        }
    }
    found
}

/// Whether any of `names` (e.g. `-v`, `--verbose`) appears before `--`
pub fn peek_flag(args: &[String], names: &[&str]) -> bool {
    args.iter()
        .skip(1)
        .take_while(|arg| *arg != "--")
        .any(|arg| names.contains(&arg.as_str()))
}
