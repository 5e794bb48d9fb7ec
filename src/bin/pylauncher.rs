use pylauncher::{init_logging, LaunchError, Launcher, LauncherConfig, LogConfig};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

#[derive(Debug)]
struct Config {
    config_file: Option<PathBuf>,
    root: Option<PathBuf>,
    lines: Vec<String>,
    compile_to: Option<PathBuf>,
    json: bool,
    files: Vec<String>,
}

impl Config {
    fn from_args() -> Result<Self, String> {
        let args: Vec<String> = std::env::args().collect();
        let prog = args.first().map(String::as_str).unwrap_or("pylauncher");

        let mut config = Self {
            config_file: None,
            root: None,
            lines: Vec::new(),
            compile_to: None,
            json: false,
            files: Vec::new(),
        };

        let mut iter = args.iter().skip(1);
        while let Some(arg) = iter.next() {
            let mut value = |option: &str| {
                iter.next()
                    .cloned()
                    .ok_or_else(|| format!("{} needs a value\n\n{}", option, Self::usage(prog)))
            };

            match arg.as_str() {
                "--help" | "-h" => return Err(Self::usage(prog)),
                "--config" => config.config_file = Some(PathBuf::from(value("--config")?)),
                "--root" => config.root = Some(PathBuf::from(value("--root")?)),
                "--line" => config.lines.push(value("--line")?),
                "--compile" => config.compile_to = Some(PathBuf::from(value("--compile")?)),
                "--json" => config.json = true,
                path if !path.starts_with("--") => config.files.push(path.to_string()),
                opt => return Err(format!("Unknown option: {}\n\n{}", opt, Self::usage(prog))),
            }
        }

        if config.files.is_empty() && config.lines.is_empty() {
            return Err(format!("Nothing to run\n\n{}", Self::usage(prog)));
        }
        if config.compile_to.is_some() && (config.files.len() != 1 || !config.lines.is_empty()) {
            return Err("--compile takes exactly one source file".to_string());
        }

        Ok(config)
    }

    fn usage(prog: &str) -> String {
        format!(
            "pylauncher - run scripts in an embedded interpreter\n\n\
            USAGE:\n    {} [OPTIONS] [files...]\n\n\
            OPTIONS:\n    \
            -h, --help        Print help information\n    \
            --config FILE     Launcher configuration (default: discover pylauncher.toml)\n    \
            --root DIR        Directory script names resolve against\n    \
            --line TEXT       Run one line of text (repeatable)\n    \
            --compile OUT     Write the compiled container for the single source file\n    \
            --json            Print one JSON summary per input\n\n\
            EXAMPLES:\n    \
            {} main.py\n    \
            {} --root scripts --line \"import host\" ui/intro.py\n    \
            {} --compile intro.pyc ui/intro.py",
            prog, prog, prog, prog
        )
    }
}

#[derive(Debug, Serialize)]
struct Outcome {
    input: String,
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl Outcome {
    fn new(input: impl Into<String>, result: Result<(), LaunchError>, launcher: &mut Launcher) -> Self {
        let error = match result {
            Ok(()) => None,
            Err(e) if e.is_resolution() => Some(e.to_string()),
            Err(e) => {
                let message = launcher.get_error().to_string();
                Some(if message.is_empty() { e.to_string() } else { message })
            }
        };
        Self { input: input.into(), ok: error.is_none(), error }
    }

    fn print(&self, json: bool) {
        if json {
            match serde_json::to_string(self) {
                Ok(line) => println!("{}", line),
                Err(e) => error!(error = %e, "Cannot serialize outcome"),
            }
        } else if let Some(message) = &self.error {
            eprintln!("\x1b[31m{}: {}\x1b[0m", self.input, message);
        }
    }
}

fn load_launcher_config(config: &Config) -> Result<LauncherConfig, String> {
    let mut launcher_config = match &config.config_file {
        Some(path) => LauncherConfig::load(path).map_err(|e| e.to_string())?,
        None => LauncherConfig::discover(),
    };
    if let Some(root) = &config.root {
        launcher_config.script_root = Some(root.clone());
    }
    Ok(launcher_config)
}

fn compile(launcher: &mut Launcher, source: &str, out: &Path) -> Result<(), String> {
    let data = fs::read(source).map_err(|e| format!("Cannot read {}: {}", source, e))?;
    let container = launcher
        .compile_to_container(source, &data)
        .map_err(|e| e.to_string())?;
    fs::write(out, container).map_err(|e| format!("Cannot write {}: {}", out.display(), e))?;
    info!(source, out = %out.display(), "Compiled container written");
    Ok(())
}

fn run(launcher: &mut Launcher, config: &Config) -> usize {
    let mut failures = 0;

    for line in &config.lines {
        let result = launcher.run_line(line);
        let outcome = Outcome::new(line.as_str(), result, launcher);
        failures += usize::from(!outcome.ok);
        outcome.print(config.json);
    }

    for file in &config.files {
        info!(file = %file, "Running");
        let result = if file.ends_with(".pyc") {
            launcher.run_compiled_file(file)
        } else {
            launcher.run_file(file)
        };
        let outcome = Outcome::new(file.as_str(), result, launcher);
        failures += usize::from(!outcome.ok);
        outcome.print(config.json);
    }

    failures
}

fn main() {
    // Initialize logging early
    let guard = init_logging(LogConfig::from_env());

    let config = match Config::from_args() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };
    debug!(?config, "Arguments parsed");

    let launcher_config = match load_launcher_config(&config) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    let mut launcher = match Launcher::builder().with_config(launcher_config).build() {
        Ok(launcher) => launcher,
        Err(e) => {
            error!(error = %e, "Failed to start interpreter");
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    let failures = match launcher.create() {
        Err(e) => {
            eprintln!("{}", e);
            1
        }
        Ok(()) => match (&config.compile_to, config.files.first()) {
            (Some(out), Some(source)) => match compile(&mut launcher, source, out) {
                Ok(()) => 0,
                Err(e) => {
                    eprintln!("{}", e);
                    1
                }
            },
            _ => run(&mut launcher, &config),
        },
    };

    launcher.finalize();

    if failures > 0 {
        error!(failures, "Run failed");
        drop(guard);
        std::process::exit(1);
    }
    info!("All inputs ran");
}
