//! Shell completion generation and installation.

use anyhow::{Context, Result};
use clap::CommandFactory;
use clap_complete::{Shell, generate};
use console::style;
use std::env;
use std::fs;
use std::io;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use crate::Cli;

const BIN: &str = "portlink";
const ZSH_FPATH_LINE: &str = "fpath=(~/.zfunc $fpath)";

/// Render the completion script for `shell`.
fn render(shell: Shell, out: &mut dyn io::Write) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, BIN, out);
}

/// Generate shell completions to stdout.
pub(crate) fn cmd_completions(shell: Shell) {
    render(shell, &mut io::stdout());
}

/// Detect the user's current shell from environment.
fn detect_shell_type() -> Option<Shell> {
    if let Ok(shell_path) = env::var("SHELL") {
        return shell_from_path(&shell_path);
    }
    if cfg!(windows) && env::var("PSModulePath").is_ok() {
        return Some(Shell::PowerShell);
    }
    None
}

/// Map a shell binary path to its `Shell`.
fn shell_from_path(shell_path: &str) -> Option<Shell> {
    let name = Path::new(shell_path)
        .file_name()
        .and_then(|n| n.to_str())?;
    match name {
        "bash" => Some(Shell::Bash),
        "zsh" => Some(Shell::Zsh),
        "fish" => Some(Shell::Fish),
        "elvish" => Some(Shell::Elvish),
        "pwsh" | "powershell" => Some(Shell::PowerShell),
        _ => None,
    }
}

/// Where a shell looks for user completion scripts.
struct InstallDirs {
    home: PathBuf,
    config: PathBuf,
    data: PathBuf,
    profile: Option<PathBuf>,
}

impl InstallDirs {
    fn from_env() -> Result<Self> {
        let home = env::var("HOME")
            .or_else(|_| env::var("USERPROFILE"))
            .map(PathBuf::from)
            .context("Could not determine home directory")?;
        let config = env::var("XDG_CONFIG_HOME").map_or_else(|_| home.join(".config"), PathBuf::from);
        let data = env::var("XDG_DATA_HOME").map_or_else(
            |_| {
                home.join(".local")
                    .join("share")
            },
            PathBuf::from,
        );
        let profile = env::var("PROFILE")
            .ok()
            .map(PathBuf::from);
        Ok(Self {
            home,
            config,
            data,
            profile,
        })
    }

    /// Completion script path for `shell`.
    fn script_path(&self, shell: Shell) -> Result<PathBuf> {
        let path = match shell {
            Shell::Bash => self
                .data
                .join("bash-completion/completions")
                .join(BIN),
            Shell::Zsh => self
                .home
                .join(".zfunc")
                .join(format!("_{BIN}")),
            Shell::Fish => self
                .config
                .join("fish/completions")
                .join(format!("{BIN}.fish")),
            Shell::Elvish => self
                .config
                .join("elvish/lib")
                .join(format!("{BIN}.elv")),
            Shell::PowerShell => self
                .profile
                .as_deref()
                .and_then(Path::parent)
                .map_or_else(|| self.config.join("powershell/completions"), Path::to_path_buf)
                .join(format!("{BIN}.ps1")),
            _ => anyhow::bail!("Unsupported shell for auto-install"),
        };
        Ok(path)
    }
}

/// Make sure `~/.zshrc` puts `~/.zfunc` on the function path.
fn ensure_zsh_fpath(home: &Path) -> Result<()> {
    let zshrc = home.join(".zshrc");
    let present = fs::read_to_string(&zshrc).is_ok_and(|content| content.contains(ZSH_FPATH_LINE));
    if present {
        return Ok(());
    }

    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&zshrc)
        .with_context(|| format!("Failed to update {}", zshrc.display()))?;
    writeln!(file, "\n# {BIN} completions")?;
    writeln!(file, "{ZSH_FPATH_LINE}")?;
    writeln!(file, "autoload -Uz compinit && compinit")?;
    eprintln!(
        "{} Added fpath to {}",
        style("✓")
            .green()
            .bold(),
        style(zshrc.display()).yellow()
    );
    Ok(())
}

/// Install shell completions automatically.
pub(crate) fn cmd_completions_install(shell_arg: Option<Shell>) -> Result<()> {
    let shell = match shell_arg {
        Some(s) => s,
        None => detect_shell_type().context(
            "Could not detect your shell. Please specify it explicitly:\n  \
             portlink completions --install bash",
        )?,
    };

    let dirs = InstallDirs::from_env()?;
    let path = dirs.script_path(shell)?;

    let mut buf = Vec::new();
    render(shell, &mut buf);

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    fs::write(&path, &buf)
        .with_context(|| format!("Failed to write completion file: {}", path.display()))?;

    eprintln!(
        "{} Installed {} completions to {}",
        style("✓")
            .green()
            .bold(),
        style(shell).cyan(),
        style(path.display()).yellow()
    );

    eprintln!();
    match shell {
        Shell::Bash => eprintln!(
            "To activate now: {}",
            style(format!("source {}", path.display())).cyan()
        ),
        Shell::Zsh => {
            ensure_zsh_fpath(&dirs.home)?;
            eprintln!("Restart your shell or run: {}", style("exec zsh").cyan());
        },
        Shell::PowerShell => eprintln!(
            "Add this to your PowerShell profile: {}",
            style(format!("Import-Module {}", path.display())).cyan()
        ),
        _ => eprintln!("Completions will be loaded automatically in new sessions."),
    }

    Ok(())
}
