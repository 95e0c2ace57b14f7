use std::{
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    floating_type_mod::FT,
    performance_counters::{PerformanceCounters, ValueCounters},
    simulation_parameters::SimulationParams,
    vec2f, write_statistics, FluidSimulation, SimulationError,
};

const CARGO_PKG_AUTHORS: &str = env!("CARGO_PKG_AUTHORS");
const CARGO_PKG_VERSION: &str = env!("CARGO_PKG_VERSION");
const CARGO_PKG_DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read `{}`: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("unknown configuration key `{0}`")]
    UnknownKey(String),
    #[error("`{}` does not contain a mapping of configuration keys", .path.display())]
    NotAMapping { path: PathBuf },
}

#[derive(Debug, Error)]
enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Simulation(#[from] SimulationError),
    #[error("invalid value `{value}` for {name}")]
    InvalidArgument { name: &'static str, value: String },
    #[error("failed to write `{}`: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Pointer input applied before frame `frame` (and kept until the next event).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InteractionEvent {
    pub frame: usize,
    pub x: FT,
    pub y: FT,
    pub strength: FT,
}

struct RunOptions {
    max_frames: Option<usize>,
    max_seconds: Option<FT>,
    interaction_script: Vec<InteractionEvent>,
    counters_enabled: bool,
}

pub fn start() {
    let matches = App::new("PBF Fluid Simulation")
        .version(CARGO_PKG_VERSION)
        .author(CARGO_PKG_AUTHORS)
        .about(CARGO_PKG_DESCRIPTION)
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("v")
                .short("v")
                .multiple(true)
                .global(true)
                .help("Sets the level of verbosity"),
        )
        .subcommand(
            SubCommand::with_name("run")
                .about("Run simulation with given config")
                .arg(
                    Arg::with_name("SIMULATION_CONFIG")
                        .help("Sets the simulation paramaters")
                        .required(true)
                        .index(1),
                )
                .arg(
                    Arg::with_name("OVERWRITE_CONFIG_FILE")
                        .long("overwrite-config-file")
                        .short("c")
                        .required(false)
                        .takes_value(true)
                        .help("Overwrite individual keys of the simulation config"),
                )
                .arg(
                    Arg::with_name("MAX_FRAMES")
                        .long("max-frames")
                        .short("n")
                        .required(false)
                        .takes_value(true)
                        .help("Stop simulation after the given number of frames"),
                )
                .arg(
                    Arg::with_name("MAX_SECONDS")
                        .long("max-seconds")
                        .short("s")
                        .required(false)
                        .takes_value(true)
                        .help("Stop simulation after the given amount of simulated seconds"),
                )
                .arg(
                    Arg::with_name("INTERACTION_SCRIPT")
                        .long("interaction-script")
                        .short("i")
                        .required(false)
                        .takes_value(true)
                        .help("YAML list of pointer events ({frame, x, y, strength}) to replay"),
                )
                .arg(
                    Arg::with_name("STATISTICS_ENABLED")
                        .help("Track performance of individual steps")
                        .short("p")
                        .long("statistics-enabled")
                        .takes_value(false),
                )
                .arg(
                    Arg::with_name("STATISTICS_PATH")
                        .long("statistics-path")
                        .short("w")
                        .required(false)
                        .takes_value(true)
                        .help("Where to write statistics to"),
                ),
        )
        .subcommand(
            SubCommand::with_name("write-default-config")
                .about("Write the default simulation config to a file")
                .arg(
                    Arg::with_name("OUTPUT_YAML")
                        .help("YAML file where the config is written to")
                        .default_value("./simulation-config.yaml")
                        .takes_value(true)
                        .required(true),
                ),
        )
        .get_matches();

    let verbosity = matches
        .subcommand()
        .1
        .map(|subcmd_matches| subcmd_matches.occurrences_of("v"))
        .unwrap_or(0)
        .max(matches.occurrences_of("v"));
    init_logging(verbosity);

    let result = if let Some(run_matches) = matches.subcommand_matches("run") {
        run(run_matches)
    } else if let Some(subcmd_matches) = matches.subcommand_matches("write-default-config") {
        let yaml_path = subcmd_matches.value_of("OUTPUT_YAML").unwrap_or("./simulation-config.yaml");
        write_default_config(Path::new(yaml_path))
    } else {
        unreachable!()
    };

    if let Err(err) = result {
        error!("{}", err);
        std::process::exit(1);
    }
}

fn init_logging(verbosity: u64) {
    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn parse_arg<T: std::str::FromStr>(matches: &ArgMatches, name: &'static str) -> Result<Option<T>, RunError> {
    matches
        .value_of(name)
        .map(|value| {
            value.parse::<T>().map_err(|_| RunError::InvalidArgument {
                name,
                value: value.to_string(),
            })
        })
        .transpose()
}

fn run(run_matches: &ArgMatches) -> Result<(), RunError> {
    let parameter_file = Path::new(run_matches.value_of("SIMULATION_CONFIG").unwrap_or_default());
    let overwrite_file = run_matches.value_of("OVERWRITE_CONFIG_FILE").map(Path::new);
    let simulation_params = load_simulation_params(parameter_file, overwrite_file)?;
    debug!("{:?}", simulation_params);

    let interaction_script = match run_matches.value_of("INTERACTION_SCRIPT") {
        Some(path) => load_interaction_script(Path::new(path))?,
        None => Vec::new(),
    };

    let options = RunOptions {
        max_frames: parse_arg(run_matches, "MAX_FRAMES")?,
        max_seconds: parse_arg(run_matches, "MAX_SECONDS")?,
        interaction_script,
        counters_enabled: run_matches.is_present("STATISTICS_ENABLED"),
    };

    if options.max_frames.is_none() && options.max_seconds.is_none() {
        warn!("neither --max-frames nor --max-seconds given, running until interrupted");
    }

    let fluid_simulation = fluid_main(simulation_params, &options)?;

    if options.counters_enabled {
        let s = write_statistics(&fluid_simulation);
        print!("{}", s);
        if let Some(statistics_path) = run_matches.value_of("STATISTICS_PATH") {
            std::fs::write(statistics_path, s).map_err(|source| RunError::Write {
                path: PathBuf::from(statistics_path),
                source,
            })?;
        }
    }

    Ok(())
}

fn fluid_main(simulation_params: SimulationParams, options: &RunOptions) -> Result<FluidSimulation, SimulationError> {
    let mut fluid_simulation = FluidSimulation::new(simulation_params)?;
    fluid_simulation.pcounters = PerformanceCounters::new(options.counters_enabled);
    fluid_simulation.vcounters = ValueCounters::new(options.counters_enabled);

    let mut next_event = 0;
    let mut total_duration: Duration = Duration::from_nanos(0);
    let mut total_number_of_frames: u32 = 0;

    loop {
        if let Some(max_frames) = options.max_frames {
            if fluid_simulation.frame_number() >= max_frames {
                break;
            }
        }
        if let Some(max_seconds) = options.max_seconds {
            if fluid_simulation.time() >= max_seconds {
                break;
            }
        }

        while let Some(event) = options.interaction_script.get(next_event) {
            if event.frame > fluid_simulation.frame_number() {
                break;
            }
            debug!(
                "interaction at frame {}: ({}, {}) strength {}",
                event.frame, event.x, event.y, event.strength
            );
            fluid_simulation.set_interaction_input(vec2f(event.x, event.y), event.strength);
            next_event += 1;
        }

        let a = Instant::now();
        fluid_simulation.single_step();
        let b = Instant::now();

        total_duration += b - a;
        total_number_of_frames += 1;

        let frame_msecs = (b - a).as_secs_f32() * 1000.;
        let avg_msecs = (total_duration / total_number_of_frames).as_secs_f32() * 1000.;
        debug!(
            "{:05}: {} particles {}msec ({}msec AVG)",
            fluid_simulation.frame_number(),
            fluid_simulation.num_particles(),
            frame_msecs,
            avg_msecs
        );
        if fluid_simulation.frame_number() % 100 == 0 {
            info!(
                "{:05}: {} particles {:.3}msec AVG, density error {:.5}",
                fluid_simulation.frame_number(),
                fluid_simulation.num_particles(),
                avg_msecs,
                fluid_simulation.average_density_error()
            );
        }
    }

    info!(
        "finished after {} frames ({:.3} simulated seconds, {:.3}s wall clock)",
        fluid_simulation.frame_number(),
        fluid_simulation.time(),
        total_duration.as_secs_f32()
    );

    Ok(fluid_simulation)
}

fn read_yaml(path: &Path) -> Result<serde_yaml::Value, ConfigError> {
    let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_yaml::from_str(&yaml)?)
}

/**
 * Merge the keys of `overwrite` into `target`. Only keys that already exist in
 * `target` are accepted, which catches misspelled parameter names.
 */
fn overwrite_keys(
    target: &mut serde_yaml::Value,
    overwrite: serde_yaml::Value,
    overwrite_path: &Path,
) -> Result<(), ConfigError> {
    let not_a_mapping = || ConfigError::NotAMapping {
        path: overwrite_path.to_path_buf(),
    };

    let overwrite = match overwrite {
        serde_yaml::Value::Mapping(mapping) => mapping,
        // an empty file
        serde_yaml::Value::Null => return Ok(()),
        _ => return Err(not_a_mapping()),
    };

    let mapping = target.as_mapping_mut().ok_or_else(not_a_mapping)?;
    for (k, v) in overwrite.into_iter() {
        match mapping.get_mut(&k) {
            Some(slot) => *slot = v,
            None => {
                let key = k.as_str().map(String::from).unwrap_or_else(|| format!("{:?}", k));
                return Err(ConfigError::UnknownKey(key));
            }
        }
    }
    Ok(())
}

/// Defaults, overwritten by the keys of `parameter_file` and then by those of `overwrite_file`.
pub fn load_simulation_params(
    parameter_file: &Path,
    overwrite_file: Option<&Path>,
) -> Result<SimulationParams, ConfigError> {
    let mut simulation_params_serde = serde_yaml::to_value(SimulationParams::default())?;

    overwrite_keys(&mut simulation_params_serde, read_yaml(parameter_file)?, parameter_file)?;
    if let Some(overwrite_file) = overwrite_file {
        overwrite_keys(&mut simulation_params_serde, read_yaml(overwrite_file)?, overwrite_file)?;
    }

    Ok(serde_yaml::from_value(simulation_params_serde)?)
}

/// Events sorted by frame; events of the same frame keep their file order.
pub fn load_interaction_script(path: &Path) -> Result<Vec<InteractionEvent>, ConfigError> {
    let mut events: Vec<InteractionEvent> = serde_yaml::from_value(read_yaml(path)?)?;
    events.sort_by_key(|event| event.frame);
    Ok(events)
}

fn write_default_config(yaml_path: &Path) -> Result<(), RunError> {
    let yaml = serde_yaml::to_string(&SimulationParams::default()).map_err(ConfigError::from)?;
    info!("Writing to file `{}`...", yaml_path.display());
    std::fs::write(yaml_path, yaml).map_err(|source| RunError::Write {
        path: yaml_path.to_path_buf(),
        source,
    })
}
