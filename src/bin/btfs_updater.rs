//! Auto-updater companion binary (spec §1, §4.7, §6; grounded on
//! `cmd/btfs/autoupdate.go`): polls a remote config for a newer version,
//! downloads and MD5-verifies the matching binary, and hands off to a
//! platform update process.
//!
//! Differs from the original in one deliberate way (SPEC_FULL.md §9):
//! privilege escalation on non-Windows is an explicit `--allow-sudo` flag
//! rather than an unconditional `sudo` invocation.

#[path = "../version.rs"]
mod version;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const CONFIG_REPO_URL: &str = "https://raw.githubusercontent.com/TRON-US/btfs-autoupdate-config/test/";

#[derive(Debug, Clone, Deserialize)]
struct UpdateConfig {
    version: String,
    md5: String,
    #[serde(rename = "autoupdateFlg")]
    autoupdate_flg: bool,
    #[serde(rename = "sleepTime")]
    sleep_time: u64,
}

struct Paths {
    project_dir: PathBuf,
    download_dir: PathBuf,
    config_file: String,
    update_binary: String,
    btfs_binary: String,
}

impl Paths {
    fn new(project_dir: PathBuf, download_dir: PathBuf) -> Option<Self> {
        let (os, arch) = (std::env::consts::OS, std::env::consts::ARCH);
        let os = match os {
            "macos" => "darwin",
            other => other,
        };
        let arch = match arch {
            "x86" => "386",
            other => other,
        };
        if !matches!(os, "darwin" | "linux" | "windows") || !matches!(arch, "amd64" | "386") {
            return None;
        }
        let ext = if os == "windows" { ".exe" } else { "" };
        Some(Self {
            project_dir,
            download_dir,
            config_file: format!("config_{os}_{arch}.yaml"),
            update_binary: format!("update-{os}-{arch}{ext}"),
            btfs_binary: format!("btfs-{os}-{arch}{ext}"),
        })
    }

    fn current_config_path(&self) -> PathBuf {
        self.project_dir.join("config.yaml")
    }

    fn latest_config_path(&self) -> PathBuf {
        self.download_dir.join(&self.config_file)
    }

    fn latest_btfs_binary_path(&self) -> PathBuf {
        self.download_dir.join(&self.btfs_binary)
    }

    fn update_binary_path(&self) -> PathBuf {
        self.download_dir.join(&self.update_binary)
    }
}

/// CLI flags. `-project`/`-download` mirror the invocation the updater
/// receives from the parent process (spec §6); `--allow-sudo` is this
/// crate's deliberate opt-in (SPEC_FULL.md §9).
struct Args {
    project_dir: PathBuf,
    download_dir: PathBuf,
    allow_sudo: bool,
}

fn parse_args() -> Args {
    let mut project_dir = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."));
    let mut download_dir = std::env::temp_dir();
    let mut allow_sudo = false;

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "-project" | "--project" => {
                if let Some(v) = it.next() {
                    project_dir = PathBuf::from(v);
                }
            }
            "-download" | "--download" => {
                if let Some(v) = it.next() {
                    download_dir = PathBuf::from(v);
                }
            }
            "--allow-sudo" => allow_sudo = true,
            _ => {}
        }
    }

    Args {
        project_dir,
        download_dir,
        allow_sudo,
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "btfs_updater=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = parse_args();
    let Some(paths) = Paths::new(args.project_dir.clone(), args.download_dir.clone()) else {
        tracing::error!(
            os = std::env::consts::OS,
            arch = std::env::consts::ARCH,
            "operating system/arch does not support automatic updates"
        );
        return;
    };

    let current_config = match read_config(&paths.current_config_path()).await {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "failed to read current config file");
            return;
        }
    };

    if !current_config.autoupdate_flg {
        tracing::info!("automatic update is not turned on");
        return;
    }

    let client = reqwest::Client::new();

    loop {
        tokio::time::sleep(Duration::from_secs(current_config.sleep_time)).await;

        if let Err(e) = run_cycle(&client, &paths, &current_config, args.allow_sudo).await {
            tracing::warn!(error = %e, "auto-update cycle failed, will retry after sleep");
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum UpdaterError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("config parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("version compare error: {0}")]
    Version(#[from] version::Malformed),
    #[error("md5 mismatch: expected {expected}, got {actual}")]
    Md5Mismatch { expected: String, actual: String },
}

async fn run_cycle(
    client: &reqwest::Client,
    paths: &Paths,
    current_config: &UpdateConfig,
    allow_sudo: bool,
) -> Result<(), UpdaterError> {
    let _ = tokio::fs::remove_file(paths.latest_config_path()).await;
    download(client, &paths.latest_config_path(), &format!("{CONFIG_REPO_URL}{}", paths.config_file)).await?;

    let latest_config = read_config(&paths.latest_config_path()).await?;

    if version::compare(&latest_config.version, &current_config.version)? != std::cmp::Ordering::Greater {
        return Ok(());
    }

    tracing::info!(from = %current_config.version, to = %latest_config.version, "newer version available, downloading");

    let _ = tokio::fs::remove_file(paths.latest_btfs_binary_path()).await;
    download(
        client,
        &paths.latest_btfs_binary_path(),
        &format!("{CONFIG_REPO_URL}{}", paths.btfs_binary),
    )
    .await?;

    let actual_md5 = md5_hex(&paths.latest_btfs_binary_path()).await?;
    if actual_md5 != latest_config.md5 {
        return Err(UpdaterError::Md5Mismatch {
            expected: latest_config.md5,
            actual: actual_md5,
        });
    }
    tracing::info!("md5 check succeeded");

    let _ = tokio::fs::remove_file(paths.update_binary_path()).await;
    download(
        client,
        &paths.update_binary_path(),
        &format!("{CONFIG_REPO_URL}{}", paths.update_binary),
    )
    .await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&paths.update_binary_path(), std::fs::Permissions::from_mode(0o775)).await?;
    }

    launch_update_process(paths, allow_sudo)?;
    tracing::info!("update process launched, exiting");
    std::process::exit(0);
}

async fn read_config(path: &Path) -> Result<UpdateConfig, UpdaterError> {
    let bytes = tokio::fs::read(path).await?;
    Ok(serde_yaml::from_slice(&bytes)?)
}

async fn download(client: &reqwest::Client, dest: &Path, url: &str) -> Result<(), UpdaterError> {
    let bytes = client.get(url).send().await?.bytes().await?;
    tokio::fs::write(dest, &bytes).await?;
    tracing::info!(url, bytes = bytes.len(), "download succeeded");
    Ok(())
}

async fn md5_hex(path: &Path) -> Result<String, UpdaterError> {
    use md5::{Digest, Md5};
    let bytes = tokio::fs::read(path).await?;
    let mut hasher = Md5::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

/// Start the platform update process. Non-Windows escalation via `sudo`
/// only happens when the operator opted in with `--allow-sudo`
/// (SPEC_FULL.md §9) — the original always escalates unconditionally.
fn launch_update_process(paths: &Paths, allow_sudo: bool) -> Result<(), UpdaterError> {
    let project_arg = format!("{}/", paths.project_dir.display());
    let download_arg = format!("{}/", paths.download_dir.display());

    let mut cmd = if cfg!(windows) {
        std::process::Command::new(paths.update_binary_path())
    } else if allow_sudo {
        let mut c = std::process::Command::new("sudo");
        c.arg(paths.update_binary_path());
        c
    } else {
        tracing::warn!("running updater without sudo; pass --allow-sudo if the update binary needs elevated privileges");
        std::process::Command::new(paths.update_binary_path())
    };

    cmd.arg("-project").arg(project_arg).arg("-download").arg(download_arg);
    cmd.spawn()?;
    Ok(())
}
