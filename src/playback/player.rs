//! External player launch - mpv/PotPlayer support
//!
//! Builds the player's command line (fixed per player kind, then the user's
//! extra arguments) and spawns it through the platform shell, since players
//! are handed one shell-escaped command line.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::{debug, info};

use crate::config::PlayerSettings;
use crate::error::{PlaybackError, Result};
use crate::models::human_time;

/// Supported external players
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerKind {
    Mpv,
    PotPlayer,
    /// Anything else: receives the media reference only
    Plain,
}

impl PlayerKind {
    /// Identify the player from its command string
    pub fn detect(command: &str) -> Self {
        let lower = command.to_lowercase();
        if lower.contains("mpv") {
            PlayerKind::Mpv
        } else if lower.contains("potplayer") {
            PlayerKind::PotPlayer
        } else {
            PlayerKind::Plain
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            PlayerKind::Mpv => "mpv",
            PlayerKind::PotPlayer => "PotPlayer",
            PlayerKind::Plain => "player",
        }
    }

    /// Whether the player can open a gateway-backed playlist
    pub fn supports_playlist(&self) -> bool {
        !matches!(self, PlayerKind::Plain)
    }

    /// Whether the player exposes a JSON control channel
    pub fn supports_control(&self) -> bool {
        matches!(self, PlayerKind::Mpv)
    }
}

impl std::fmt::Display for PlayerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Host platform conventions for quoting and launching
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Windows,
    MacOs,
    Linux,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else if cfg!(target_os = "macos") {
            Platform::MacOs
        } else {
            Platform::Linux
        }
    }

    /// Quote one argument for the platform shell
    pub fn quote(&self, arg: &str) -> String {
        match self {
            Platform::Windows => format!("\"{}\"", arg.replace('"', "\\\"")),
            Platform::MacOs | Platform::Linux => format!("'{}'", arg.replace('\'', r"'\''")),
        }
    }

    /// Exit code the launch shell uses for a command it could not find
    pub fn missing_command_code(&self) -> i32 {
        match self {
            Platform::Windows => 9009,
            Platform::MacOs | Platform::Linux => 127,
        }
    }
}

/// What the player should open
#[derive(Debug, Clone, PartialEq)]
pub enum MediaSource {
    /// A resolved media URL
    Url(String),
    /// A playlist file, starting at `start_index`
    Playlist { path: PathBuf, start_index: usize },
}

/// Per-launch values the command line is built from
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub title: String,
    pub referer: String,
    pub media: MediaSource,
    /// Resume position in seconds
    pub start_at: Option<f64>,
    pub subtitle_url: Option<String>,
    /// Control-channel endpoint passed to mpv
    pub ipc_endpoint: Option<String>,
}

/// A fully built player invocation
#[derive(Debug, Clone)]
pub struct LaunchCommand {
    pub kind: PlayerKind,
    pub platform: Platform,
    /// Player path as configured
    pub player: String,
    /// Quoted arguments in launch order
    pub args: Vec<String>,
}

impl LaunchCommand {
    /// Build the command line for the configured player
    pub fn build(settings: &PlayerSettings, opts: &LaunchOptions, platform: Platform) -> Self {
        let kind = PlayerKind::detect(&settings.path);
        let q = |s: &str| platform.quote(s);
        let title = clean_for_command_line(&opts.title);

        let mut args = vec![match &opts.media {
            MediaSource::Url(url) => q(url),
            MediaSource::Playlist { path, .. } => q(&path.to_string_lossy()),
        }];

        match kind {
            PlayerKind::Mpv => {
                args.extend(
                    [
                        "--idle",
                        "--msg-level=all=no,ipc=v",
                        "--force-window=immediate",
                        "--hwdec=auto",
                        "--geometry=80%",
                        "--autofit-larger=100%x100%",
                        "--autofit-smaller=640",
                        "--audio-pitch-correction=yes",
                        "--keep-open-pause=no",
                        "--alang=[en,eng,zh,chi,chs,sc,zho]",
                        "--slang=[zh,chi,chs,sc,zho,en,eng]",
                    ]
                    .map(String::from),
                );
                if let Some(endpoint) = &opts.ipc_endpoint {
                    args.push(format!("--input-ipc-server={}", q(endpoint)));
                }
                args.push(format!("--force-media-title={}", q(&title)));
                args.push(format!("--referrer={}", q(&opts.referer)));
                args.push(format!("--title={}", q(&title)));
                if let Some(start) = opts.start_at.filter(|s| *s > 0.0) {
                    args.push(format!("--start={}", q(&human_time(start))));
                }
                if let Some(sub) = &opts.subtitle_url {
                    args.push(format!("--sub-file={}", q(sub)));
                }
                if let MediaSource::Playlist { start_index, .. } = &opts.media {
                    args.push(format!("--playlist-start={}", start_index));
                }
            }
            PlayerKind::PotPlayer => {
                args.push("/new".to_string());
                args.push("/autoplay".to_string());
                args.push(format!("/referer={}", q(&opts.referer)));
                args.push(format!("/title={}", q(&title)));
                if let Some(start) = opts.start_at.filter(|s| *s > 0.0) {
                    args.push(format!("/seek={}", q(&human_time(start))));
                }
                if let Some(sub) = &opts.subtitle_url {
                    args.push(format!("/sub={}", q(sub)));
                }
            }
            PlayerKind::Plain => {}
        }

        // User arguments are quoted like everything else; one that repeats a
        // fixed flag is dropped
        if kind != PlayerKind::Plain {
            for extra in &settings.extra_args {
                if !args.contains(extra) {
                    args.push(q(extra));
                }
            }
        }

        Self {
            kind,
            platform,
            player: settings.path.clone(),
            args: dedup_preserving_order(args),
        }
    }

    /// Program prefix of the shell command line
    fn program(&self) -> String {
        let quoted = self.platform.quote(&self.player);
        if self.platform == Platform::MacOs && self.player.ends_with(".app") {
            // -W keeps `open` alive until the app quits so exit tracking works
            let pass_args = if self.player.contains("mpv.app") { " --args" } else { "" };
            format!("open -W -a {}{}", quoted, pass_args)
        } else {
            quoted
        }
    }

    /// The complete shell command line
    pub fn command_line(&self) -> String {
        std::iter::once(self.program())
            .chain(self.args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Check the player can be found before handing it to the shell
    ///
    /// The shell itself always starts, so a missing player would otherwise
    /// only show up as an exit status.
    pub fn verify(&self) -> Result<()> {
        let found = if self.platform == Platform::MacOs && self.player.ends_with(".app") {
            Path::new(&self.player).exists()
        } else {
            find_program(&self.player, self.platform).is_some()
        };
        if !found {
            return Err(PlaybackError::PlayerNotFound(self.player.clone()));
        }
        Ok(())
    }

    /// Spawn the player
    ///
    /// A detached player gets its own session/process group so closing
    /// panplay does not take playback down with it.
    pub fn spawn(&self, detach: bool) -> Result<Child> {
        self.verify()?;

        let line = self.command_line();
        info!(kind = %self.kind, detach, "starting player");
        debug!(command = %line, "player command line");

        let mut cmd = shell_command(&line, detach);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::null());
        cmd.kill_on_drop(false);

        cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                PlaybackError::PlayerNotFound(self.player.clone())
            } else {
                PlaybackError::SpawnFailed(e)
            }
        })
    }
}

#[cfg(unix)]
fn shell_command(line: &str, detach: bool) -> Command {
    // exec replaces the shell so the child we track is the player itself
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(format!("exec {}", line));
    if detach {
        // SAFETY: setsid is async-signal-safe and touches no parent state
        unsafe {
            cmd.pre_exec(|| {
                if libc::setsid() == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
    }
    cmd
}

#[cfg(windows)]
fn shell_command(line: &str, detach: bool) -> Command {
    const DETACHED_PROCESS: u32 = 0x0000_0008;
    const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;

    let mut cmd = Command::new("cmd");
    cmd.arg("/d").arg("/s").arg("/c");
    cmd.raw_arg(format!("\"{}\"", line));
    if detach {
        cmd.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
    }
    cmd
}

/// Locate `program` the way the launch shell would
///
/// Anything with a directory part is taken as a path; a bare name is
/// looked up in PATH.
pub fn find_program(program: &str, platform: Platform) -> Option<PathBuf> {
    let path = Path::new(program);
    if path.components().count() > 1 || path.is_absolute() {
        return path.exists().then(|| path.to_path_buf());
    }
    let dirs = std::env::var_os("PATH")?;
    let names: Vec<String> = if platform == Platform::Windows && path.extension().is_none() {
        vec![program.to_string(), format!("{}.exe", program)]
    } else {
        vec![program.to_string()]
    };
    std::env::split_paths(&dirs)
        .flat_map(|dir| names.iter().map(move |name| dir.join(name)))
        .find(|candidate| candidate.is_file())
}

/// Drop exact duplicates, keeping each argument's first position
pub fn dedup_preserving_order(args: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    args.into_iter().filter(|a| seen.insert(a.clone())).collect()
}

/// Strip characters that would break out of a quoted shell argument
pub fn clean_for_command_line(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, '"' | '\'' | '`' | '$' | '\\' | '%' | '^' | '&' | '|' | '<' | '>'))
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect::<String>()
        .trim()
        .to_string()
}
