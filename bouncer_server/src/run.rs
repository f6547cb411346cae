use crate::config::BouncerConfig;
use crate::upstream::UpstreamConnection;

use bouncer_core::command::ShutdownAction;
use bouncer_core::directory::{MemoryUser, MemoryUserDirectory, UserDirectory, UserIdentity};
use bouncer_core::upstream::{UpstreamEvent, UpstreamLink};
use bouncer_core::{BouncerServer, BouncerState, OrLog};
use client_listener::TlsSettings;
use dns_client::SystemResolver;

use anyhow::Context;
use memfd::*;
use std::{
    env,
    fs::File,
    io::Seek,
    os::unix::{
        io::{FromRawFd, IntoRawFd, RawFd},
        process::CommandExt,
    },
    path::Path,
    process::Command,
    sync::Arc,
    time::Duration,
};
use tokio::{
    signal::unix::{signal, SignalKind},
    sync::{broadcast, mpsc::UnboundedSender},
    task::JoinHandle,
};
use tracing_subscriber::util::SubscriberInitExt;

/// How long upstream links get to send their QUIT before the process goes away
const UPSTREAM_QUIT_GRACE: Duration = Duration::from_secs(2);

fn read_upgrade_state(fd: RawFd) -> anyhow::Result<BouncerState> {
    // SAFETY: the descriptor was created by `prepare_upgrade` in the previous
    // process image and passed to us on the command line
    let memfd = unsafe { Memfd::from_raw_fd(fd) };
    let file = memfd.as_file();

    serde_json::from_reader(file).context("Failed to unpack upgrade state")
}

fn prepare_upgrade(state: &BouncerState) -> anyhow::Result<RawFd> {
    let memfd = MemfdOptions::default()
        .close_on_exec(false)
        .create("upgrade_state")
        .context("Failed to create upgrade memfd")?;
    let mut file = memfd.as_file();

    serde_json::to_writer(file, state).context("Failed to serialise bouncer state")?;
    file.rewind().context("Failed to rewind memfd")?;
    Ok(memfd.into_raw_fd())
}

/// Replace this process with a new image of `exe`, passing it `state`.
/// Only returns if that failed.
fn exec_upgrade(exe: impl AsRef<Path>, config: impl AsRef<Path>, state: BouncerState) -> anyhow::Error {
    let fd = match prepare_upgrade(&state) {
        Ok(fd) => fd,
        Err(e) => return e,
    };

    tracing::debug!(exe = ?exe.as_ref(), fd, sessions = state.sessions.len(), "Executing upgrade");

    let err = Command::new(exe.as_ref())
        .arg("--config")
        .arg(config.as_ref())
        .arg("--upgrade-state-fd")
        .arg(fd.to_string())
        .exec();

    anyhow::Error::new(err).context("exec() failed on upgrade")
}

/// Build the user directory from config, starting an upstream connection for
/// every user that has one configured
fn build_directory(
    config: &BouncerConfig,
    upstream_events: UnboundedSender<UpstreamEvent>,
) -> (MemoryUserDirectory, Vec<JoinHandle<()>>) {
    let directory = MemoryUserDirectory::default();
    let mut tasks = Vec::new();

    for settings in &config.users {
        let user = Arc::new(MemoryUser::new(settings.clone()));

        if let Some(address) = &settings.upstream {
            let (link, task) = UpstreamConnection::connect(settings, address.clone(), upstream_events.clone());
            user.set_upstream(Some(link as Arc<dyn UpstreamLink>));
            tasks.push(task);
        }

        directory.insert(user);
    }

    (directory, tasks)
}

/// Send a shutdown request when the process is asked to stop
fn watch_signals(shutdown: broadcast::Sender<ShutdownAction>) -> anyhow::Result<()> {
    let mut terminate = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;

    tokio::spawn(async move {
        tokio::select! {
            _ = terminate.recv() => tracing::info!("Got SIGTERM"),
            _ = interrupt.recv() => tracing::info!("Got SIGINT"),
        }
        shutdown.send(ShutdownAction::Shutdown).or_log("requesting shutdown");
    });
    Ok(())
}

async fn stop_upstreams(directory: &dyn UserDirectory, tasks: Vec<JoinHandle<()>>, reason: &str) {
    for user in directory.users() {
        if let Some(upstream) = user.upstream() {
            upstream.disconnect(reason);
        }
    }

    let all_done = async {
        for task in tasks {
            task.await.or_log("joining upstream task");
        }
    };
    if tokio::time::timeout(UPSTREAM_QUIT_GRACE, all_done).await.is_err() {
        tracing::warn!("Upstream connections didn't close in time");
    }
}

// The async entry point. Because `run_bouncer` can fork into the background,
// the tokio runtime is only created after doing so.
async fn do_run_bouncer(
    config_path: &Path,
    config: BouncerConfig,
    tls: Option<TlsSettings>,
    upgrade_fd: Option<RawFd>,
) -> anyhow::Result<()> {
    let exe_path = env::current_exe()?;

    crate::tracing_config::build_subscriber(config.log.clone())?.init();
    tracing::info!(pid = %nix::unistd::getpid(), "Starting bouncer");

    let settings = Arc::new(config.settings());
    let (upstream_send, upstream_events) = tokio::sync::mpsc::unbounded_channel();
    let (directory, upstream_tasks) = build_directory(&config, upstream_send);
    let directory = Arc::new(directory);
    let resolver = SystemResolver::from_system_conf().context("Failed to load resolver configuration")?;

    let mut server = match upgrade_fd {
        Some(fd) => {
            tracing::info!("Got upgrade FD {}", fd);
            let state = read_upgrade_state(fd)?;
            BouncerServer::restore_from(
                state,
                settings,
                directory.clone(),
                resolver,
                config.dns_timeout(),
                upstream_events,
            )
        }
        None => BouncerServer::new(settings, directory.clone(), resolver, config.dns_timeout(), upstream_events),
    };

    if let Some(tls) = tls {
        server.listeners_mut().load_tls_certificates(tls)?;
    }
    for listener in &config.listeners {
        let (_, bound) = server
            .listeners_mut()
            .add_listener(listener.address, listener.connection_type())
            .await
            .with_context(|| format!("Failed to listen on {}", listener.address))?;
        tracing::info!(address = %bound, tls = listener.tls, "Listening");
    }

    let (shutdown_send, shutdown_recv) = broadcast::channel(1);
    watch_signals(shutdown_send.clone())?;

    let action = server.run(shutdown_recv).await;
    drop(shutdown_send);

    match action {
        ShutdownAction::Shutdown => {
            tracing::info!("Shutting down");
            stop_upstreams(directory.as_ref(), upstream_tasks, "Bouncer shutting down").await;
            Ok(())
        }
        ShutdownAction::Upgrade => {
            let state = server.save_state().await;
            stop_upstreams(directory.as_ref(), upstream_tasks, "Bouncer reloading").await;

            Err(exec_upgrade(&exe_path, config_path, state))
        }
    }
}

/// Run the bouncer.
///
/// The config is loaded, and TLS certificates read, before anything else so
/// that errors are reported on the terminal. Unless `foreground` is set or
/// this is the second half of an upgrade, the process then daemonises,
/// redirecting standard output and error to the files named in the logging
/// config.
///
/// If `upgrade_fd` is `Some`, saved state is read from it and the sessions
/// it describes are restored.
///
/// This creates its own tokio runtime, and must not be called from within one.
pub fn run_bouncer(config_path: impl AsRef<Path>, foreground: bool, upgrade_fd: Option<RawFd>) -> anyhow::Result<()> {
    let config_path = config_path.as_ref();
    let config = BouncerConfig::load_file(config_path)?;
    let tls = config.load_tls()?;

    if !config.log.dir.is_dir() {
        std::fs::create_dir_all(&config.log.dir).context("Failed to create log directory")?;
    }

    // Don't re-daemonise if we're upgrading; the previous image already did
    if !foreground && upgrade_fd.is_none() {
        let mut daemon = daemonize::Daemonize::new()
            .exit_action(|| println!("Running in background mode"))
            .working_directory(env::current_dir()?);

        if let Some(stdout) = &config.log.stdout {
            daemon = daemon.stdout(File::create(config.log.prefix_file(stdout))?);
        }
        if let Some(stderr) = &config.log.stderr {
            daemon = daemon.stderr(File::create(config.log.prefix_file(stderr))?);
        }
        if let Some(pidfile) = &config.log.pidfile {
            daemon = daemon.pid_file(config.log.prefix_file(pidfile));
        }

        daemon
            .start()
            .map_err(|e| anyhow::anyhow!("Failed to fork to background: {}", e))?;
    }

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(do_run_bouncer(config_path, config, tls, upgrade_fd))
}

#[cfg(test)]
mod test {
    use super::*;
    use bouncer_core::server::FrozenSession;
    use bouncer_core::FreezeStore;
    use pretty_assertions::assert_eq;

    #[test]
    fn upgrade_state_survives_memfd() {
        let mut store = FreezeStore::new();
        store.add_string("client.nick", "alice");
        store.add_integer("client.fd", 9);

        let state = BouncerState {
            sessions: vec![FrozenSession {
                user: "alice".to_string(),
                store: store.clone(),
            }],
            motd: Some("hello".to_string()),
        };

        let fd = prepare_upgrade(&state).unwrap();
        let restored = read_upgrade_state(fd).unwrap();

        assert_eq!(restored.motd.as_deref(), Some("hello"));
        assert_eq!(restored.sessions.len(), 1);
        assert_eq!(restored.sessions[0].user, "alice");
        assert_eq!(restored.sessions[0].store, store);
    }

    #[tokio::test]
    async fn directory_links_upstreams() {
        let config = BouncerConfig::parse(
            r#"{
                server-name: "bnc.test",
                listeners: [],
                users: [
                    { name: "alice", password: "x", upstream: "127.0.0.1:1" },
                    { name: "bob", password: "x" },
                ],
                log: { dir: "log" },
            }"#,
        )
        .unwrap();

        let (events_send, mut events) = tokio::sync::mpsc::unbounded_channel();
        let (directory, tasks) = build_directory(&config, events_send);

        assert_eq!(tasks.len(), 1);
        assert!(directory.lookup("alice").unwrap().upstream().is_some());
        assert!(directory.lookup("bob").unwrap().upstream().is_none());

        // Nothing listens on port 1, so the link reports itself gone
        assert!(matches!(
            events.recv().await,
            Some(UpstreamEvent::Disconnected { user, .. }) if user == "alice"
        ));
    }
}
