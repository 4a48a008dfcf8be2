use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use notify::{RecursiveMode, Watcher};
use notify_debouncer_mini::{DebounceEventResult, new_debouncer};
use quire_core::{SiteBuilder, SiteConfig, SiteOutput, is_temporary_build_path};
use quire_dev_server::{LiveServer, LiveServerConfig, Reloader};
use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::settings::Settings;

pub fn make_subcommand() -> Command {
    Command::new("serve")
        .about("Build the site, serve it and rebuild on change")
        .arg(super::config_file_arg())
        .arg(
            Arg::new("dev_addr")
                .short('a')
                .long("dev-addr")
                .value_name("HOST:PORT")
                .help("Address to serve on [default: 127.0.0.1:8000]"),
        )
        .arg(
            Arg::new("open")
                .long("open")
                .help("Open browser automatically")
                .action(ArgAction::SetTrue),
        )
}

pub async fn execute(args: &ArgMatches) -> Result<()> {
    let settings = Settings::load(args)?;
    let config = settings.site_config()?;
    let addr: SocketAddr = settings
        .dev_addr
        .parse()
        .with_context(|| format!("invalid dev address '{}'", settings.dev_addr))?;

    let server = LiveServer::new(LiveServerConfig {
        addr,
        root: config.site_dir(),
        open: settings.open,
    });
    let livereload_url = server.livereload_url();
    let reloader = server.reloader();

    let output = SiteBuilder::new(&config)
        .livereload(livereload_url.clone())
        .build()?;
    println!(
        "Built {} pages into {}",
        output.page_count(),
        output.output_dir.display()
    );

    let server_handle = tokio::spawn(server.run());
    let rebuilder = Rebuilder {
        settings,
        livereload_url,
        reloader,
    };

    tokio::select! {
        served = server_handle => served??,
        watched = rebuilder.watch(&config) => watched?,
    }
    Ok(())
}

/// What a change has to touch to trigger a rebuild.
#[derive(Debug, Clone, PartialEq)]
struct WatchSet {
    roots: Vec<PathBuf>,
    config_file: PathBuf,
    site_dir: PathBuf,
}

impl WatchSet {
    fn new(config: &SiteConfig, config_file: &Path) -> Result<Self> {
        let config_file = std::path::absolute(config_file)?;
        let mut roots = vec![std::path::absolute(config.docs_dir())?];
        for path in config.watch_paths() {
            let path = std::path::absolute(path)?;
            if path != config_file && !roots.contains(&path) {
                roots.push(path);
            }
        }
        Ok(Self {
            roots,
            config_file,
            site_dir: std::path::absolute(config.site_dir())?,
        })
    }

    /// The config file is watched through its directory so editors that
    /// replace the file on save are still noticed.
    fn targets(&self) -> Vec<(PathBuf, RecursiveMode)> {
        let mut targets: Vec<_> = self
            .roots
            .iter()
            .map(|root| (root.clone(), RecursiveMode::Recursive))
            .collect();
        if let Some(parent) = self.config_file.parent() {
            targets.push((parent.to_path_buf(), RecursiveMode::NonRecursive));
        }
        targets
    }

    fn is_relevant(&self, path: &Path) -> bool {
        if is_temporary_build_path(path) || path.starts_with(&self.site_dir) {
            return false;
        }
        path == self.config_file || self.roots.iter().any(|root| path.starts_with(root))
    }
}

struct Rebuilder {
    settings: Settings,
    livereload_url: String,
    reloader: Reloader,
}

impl Rebuilder {
    async fn watch(self, config: &SiteConfig) -> Result<()> {
        let (tx, mut rx) = mpsc::channel::<Vec<PathBuf>>(100);

        let mut debouncer = new_debouncer(
            Duration::from_millis(300),
            move |res: DebounceEventResult| match res {
                Ok(events) => {
                    let paths = events.into_iter().map(|event| event.path).collect();
                    let _ = tx.blocking_send(paths);
                }
                Err(e) => warn!("watch error: {e}"),
            },
        )?;

        let mut watching = WatchSet::new(config, &self.settings.config_file)?;
        let mut registered = Vec::new();
        update_watches(debouncer.watcher(), &mut registered, &watching);
        println!("Watching for changes, press Ctrl+C to stop");

        while let Some(mut paths) = rx.recv().await {
            // Fold in whatever piled up while the last rebuild ran
            while let Ok(more) = rx.try_recv() {
                paths.extend(more);
            }
            let Some(changed) = paths.iter().find(|path| watching.is_relevant(path)) else {
                debug!(count = paths.len(), "ignoring changes outside the watched paths");
                continue;
            };
            info!(path = %changed.display(), "change detected, rebuilding");

            let settings = self.settings.clone();
            let url = self.livereload_url.clone();
            let rebuilt = tokio::task::spawn_blocking(move || rebuild(&settings, url)).await?;

            match rebuilt {
                Ok((config, output)) => {
                    println!("Rebuilt {} pages", output.page_count());
                    match WatchSet::new(&config, &self.settings.config_file) {
                        Ok(next) => {
                            if next != watching {
                                update_watches(debouncer.watcher(), &mut registered, &next);
                                watching = next;
                            }
                        }
                        Err(e) => warn!("could not refresh watched paths: {e:#}"),
                    }
                    let clients = self.reloader.reload();
                    debug!(clients, "sent reload");
                }
                // The previous site stays published, keep serving it
                Err(e) => eprintln!("Build failed: {e:#}"),
            }
        }
        Ok(())
    }
}

fn rebuild(settings: &Settings, livereload_url: String) -> Result<(SiteConfig, SiteOutput)> {
    let config = settings.site_config()?;
    let output = SiteBuilder::new(&config)
        .livereload(livereload_url)
        .build()?;
    Ok((config, output))
}

/// Bring the watcher in line with `watch_set`, leaving unchanged targets alone.
fn update_watches<W: Watcher + ?Sized>(
    watcher: &mut W,
    registered: &mut Vec<(PathBuf, RecursiveMode)>,
    watch_set: &WatchSet,
) {
    let wanted = watch_set.targets();

    registered.retain(|(path, mode)| {
        if wanted.contains(&(path.clone(), *mode)) {
            return true;
        }
        if let Err(e) = watcher.unwatch(path) {
            debug!(path = %path.display(), "unwatch failed: {e}");
        }
        false
    });

    for (path, mode) in wanted {
        if registered.contains(&(path.clone(), mode)) {
            continue;
        }
        if !path.exists() {
            warn!(path = %path.display(), "not watching a path that does not exist");
            continue;
        }
        match watcher.watch(&path, mode) {
            Ok(()) => {
                info!(path = %path.display(), "watching");
                registered.push((path, mode));
            }
            Err(e) => warn!(path = %path.display(), "could not watch: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn watch_set() -> WatchSet {
        WatchSet {
            roots: vec![PathBuf::from("/project/docs"), PathBuf::from("/project/src/pkg")],
            config_file: PathBuf::from("/project/quire.yml"),
            site_dir: PathBuf::from("/project/site"),
        }
    }

    #[test]
    fn changes_under_roots_and_the_config_file_are_relevant() {
        let set = watch_set();
        assert!(set.is_relevant(Path::new("/project/docs/guide/intro.md")));
        assert!(set.is_relevant(Path::new("/project/src/pkg/output.py")));
        assert!(set.is_relevant(Path::new("/project/quire.yml")));
    }

    #[test]
    fn siblings_of_the_config_file_are_ignored() {
        let set = watch_set();
        assert!(!set.is_relevant(Path::new("/project/README.md")));
        assert!(!set.is_relevant(Path::new("/project/quire.yml.swp")));
    }

    #[test]
    fn build_output_is_ignored() {
        let mut set = watch_set();
        set.roots.push(PathBuf::from("/project"));
        assert!(!set.is_relevant(Path::new("/project/site/index.html")));
        assert!(!set.is_relevant(Path::new("/project/.quire-staging-a1b2/index.html")));
        assert!(set.is_relevant(Path::new("/project/notes.txt")));
    }

    #[test]
    fn config_file_is_watched_through_its_directory() {
        let targets = watch_set().targets();
        assert_eq!(
            targets.last(),
            Some(&(PathBuf::from("/project"), RecursiveMode::NonRecursive))
        );
        assert_eq!(targets[0], (PathBuf::from("/project/docs"), RecursiveMode::Recursive));
    }

    #[test]
    fn watch_set_includes_plugin_and_custom_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let config_file = dir.path().join("quire.yml");
        std::fs::write(
            &config_file,
            "site_name: Demo\ntheme:\n  name: material\n  custom_dir: overrides\nplugins:\n  - apidoc:\n      watch: [src]\n",
        )
        .unwrap();
        let config = SiteConfig::load(&config_file).unwrap();

        let set = WatchSet::new(&config, &config_file).unwrap();
        assert_eq!(set.roots[0], dir.path().join("docs"));
        assert!(set.roots.contains(&dir.path().join("src")));
        assert!(set.roots.contains(&dir.path().join("overrides")));
        assert!(!set.roots.contains(&config_file));
        assert_eq!(set.site_dir, dir.path().join("site"));
    }
}
