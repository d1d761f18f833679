use clap::{Arg, ArgAction, Command};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info};

pub mod arn;
pub mod broker;
pub mod builder;
pub mod config;
pub mod constants;
pub mod graph;
pub mod outputs;
pub mod plan;
pub mod policy;
pub mod resource;
pub mod ssm;
pub mod writer;

const VERBOSE_FLAG: &str = "verbose";
const CONTAINERS_ARG: &str = "containers";
const DEFAULT_CONTAINERS_DIR: &str = "minecraft-config";

const PLAN_CMD: &str = "plan";
const SYNTH_CMD: &str = "synth";
const OUTPUTS_CMD: &str = "outputs";
const PARAMS_CMD: &str = "params";

fn containers_arg() -> Arg {
    Arg::new(CONTAINERS_ARG)
        .long(CONTAINERS_ARG)
        .default_value(DEFAULT_CONTAINERS_DIR)
        .help("Directory with one YAML file per Minecraft server")
        .value_parser(clap::value_parser!(PathBuf))
}

#[tokio::main]
async fn main() -> ExitCode {
    let matches = Command::new("minecraft-ondemand")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Plan the stacks of an on-demand Minecraft server on AWS.")
        .arg(
            Arg::new(VERBOSE_FLAG)
                .short('v')
                .long(VERBOSE_FLAG)
                .global(true)
                .action(ArgAction::SetTrue),
        )
        .subcommand_required(true)
        .subcommand(
            Command::new(PLAN_CMD)
                .about("Print the deployment plan.")
                .arg(containers_arg())
                .arg(
                    Arg::new("format")
                        .long("format")
                        .default_value("json")
                        .value_parser(["json", "yaml"]),
                ),
        )
        .subcommand(
            Command::new(SYNTH_CMD)
                .about("Write the plan, one file per stack and the deployment order.")
                .arg(containers_arg())
                .arg(
                    Arg::new("out")
                        .long("out")
                        .required(true)
                        .help("Output directory")
                        .value_parser(clap::value_parser!(PathBuf)),
                ),
        )
        .subcommand(
            Command::new(OUTPUTS_CMD)
                .about("Print the CloudFormation outputs of every deployed stack.")
                .arg(containers_arg())
                .arg(
                    Arg::new("out")
                        .long("out")
                        .help("Also write the outputs to this JSON file")
                        .value_parser(clap::value_parser!(PathBuf)),
                ),
        )
        .subcommand(
            Command::new(PARAMS_CMD)
                .about("Read the cross-region parameters back from SSM Parameter Store.")
                .arg(containers_arg()),
        )
        .get_matches();

    let level = if matches.get_flag(VERBOSE_FLAG) {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    let env: HashMap<String, String> = std::env::vars().collect();
    let result = match matches.subcommand() {
        Some((PLAN_CMD, matches)) => {
            let format = match matches.get_one::<String>("format").map(String::as_str) {
                Some("yaml") => writer::Format::Yaml,
                _ => writer::Format::Json,
            };
            print_plan(&env, matches.get_one::<PathBuf>(CONTAINERS_ARG), format)
        }
        Some((SYNTH_CMD, matches)) => match matches.get_one::<PathBuf>("out") {
            Some(out) => synth(&env, matches.get_one::<PathBuf>(CONTAINERS_ARG), out),
            None => Ok(()),
        },
        Some((OUTPUTS_CMD, matches)) => {
            print_outputs(
                &env,
                matches.get_one::<PathBuf>(CONTAINERS_ARG),
                matches.get_one::<PathBuf>("out"),
            )
            .await
        }
        Some((PARAMS_CMD, matches)) => {
            print_parameters(&env, matches.get_one::<PathBuf>(CONTAINERS_ARG)).await
        }
        _ => Ok(()),
    };

    if let Err(e) = result {
        error!(error = ?e, "command failed");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

fn print_plan(
    env: &HashMap<String, String>,
    containers: Option<&PathBuf>,
    format: writer::Format,
) -> Result<(), plan::Error> {
    let plan = plan::plan(env, containers.map(PathBuf::as_path))?;
    println!("{}", writer::render(&plan, format)?);
    return Ok(());
}

fn synth(
    env: &HashMap<String, String>,
    containers: Option<&PathBuf>,
    out: &Path,
) -> Result<(), plan::Error> {
    let plan = plan::plan(env, containers.map(PathBuf::as_path))?;
    for path in writer::write(&plan, out)? {
        info!(path = ?path, "written");
    }
    return Ok(());
}

async fn print_outputs(
    env: &HashMap<String, String>,
    containers: Option<&PathBuf>,
    out: Option<&PathBuf>,
) -> Result<(), plan::Error> {
    let plan = plan::plan(env, containers.map(PathBuf::as_path))?;
    let deployed = outputs::collect(&plan).await?;
    for (stack, outputs) in &deployed {
        for (key, value) in outputs {
            println!("{}\t{}\t{}", stack, key, value);
        }
    }

    if let Some(path) = out {
        writer::write_outputs(path, &deployed)?;
    }
    return Ok(());
}

async fn print_parameters(
    env: &HashMap<String, String>,
    containers: Option<&PathBuf>,
) -> Result<(), plan::Error> {
    let plan = plan::plan(env, containers.map(PathBuf::as_path))?;
    for (name, value) in ssm::read_all(&plan.parameters).await? {
        println!("{}\t{}", name, value);
    }
    return Ok(());
}
