use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use argh::FromArgs;
use exitcode::ExitCode;
use kubernetes::{Client, Config, Deployment, InitialListStrategy, WatchConfig};
use programmer_controller::cache::Informer;
use programmer_controller::controller::{Controller, Error};
use programmer_controller::crd::Programmer;
use programmer_controller::recorder::Broadcaster;
use programmer_controller::registry::Registry;
use programmer_controller::signal::{self, SignalTo};
use programmer_controller::trace;
use tokio::task::JoinError;
use tracing::{error, info, warn};
use tripwire::Tripwire;

/// Every cached object is replayed to the handlers this often.
const RESYNC_PERIOD: Duration = Duration::from_secs(30);

fn default_worker_threads() -> usize {
    std::thread::available_parallelism()
        .map(|threads| threads.get())
        .unwrap_or(1)
}

#[derive(FromArgs)]
#[argh(
    description = "Keeps the Deployment of every Programmer in line with its spec",
    help_triggers("-h", "--help")
)]
pub struct RootCommand {
    #[argh(switch, short = 'v', description = "show version")]
    version: bool,

    #[argh(
        option,
        description = "address of the Kubernetes API server, overrides the kubeconfig"
    )]
    master: Option<String>,

    #[argh(
        option,
        description = "path to a kubeconfig, in-cluster config is used if not set"
    )]
    kubeconfig: Option<PathBuf>,

    #[argh(
        option,
        short = 'w',
        default = "2",
        description = "how many keys are reconciled concurrently"
    )]
    workers: usize,

    #[argh(
        option,
        short = 'l',
        default = "\"info\".to_string()",
        description = "log level"
    )]
    log_level: String,

    #[argh(
        option,
        short = 't',
        default = "default_worker_threads()",
        description = "specify how many threads the Tokio runtime will use"
    )]
    threads: usize,
}

impl RootCommand {
    #![allow(clippy::print_stdout)]
    fn show_version(&self) {
        println!(
            "{} {}",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION")
        );
    }

    pub fn run(&self) -> Result<(), ExitCode> {
        if self.version {
            self.show_version();
            return Ok(());
        }

        if self.workers == 0 || self.threads == 0 {
            eprintln!("workers and threads must be greater than 0");
            return Err(exitcode::USAGE);
        }

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .thread_name("programmer-controller-worker")
            .worker_threads(self.threads)
            .enable_io()
            .enable_time()
            .build()
            .map_err(|err| {
                eprintln!("build runtime failed: {err}");
                exitcode::OSERR
            })?;

        let log_level =
            std::env::var("PROGRAMMER_CONTROLLER_LOG").unwrap_or(self.log_level.clone());
        let color = std::io::stdout().is_terminal();
        trace::init(color, false, &log_level);

        let result = runtime.block_on(self.serve());

        runtime.shutdown_timeout(Duration::from_secs(5));

        result
    }

    async fn serve(&self) -> Result<(), ExitCode> {
        info!(
            message = "Start programmer controller",
            version = env!("CARGO_PKG_VERSION"),
            threads = self.threads,
            workers = self.workers,
        );

        let config = Config::load(self.master.as_deref(), self.kubeconfig.as_deref())
            .map_err(|err| {
                error!(message = "load kubernetes config failed", %err);
                exitcode::CONFIG
            })?;
        let client = Client::new(config).map_err(|err| {
            error!(message = "build kubernetes client failed", %err);
            exitcode::CONFIG
        })?;

        let initial_list_strategy = match client.version().await {
            Ok(version) if version.at_least(1, 32) => InitialListStrategy::StreamingList,
            Ok(version) => {
                info!(
                    message = "streaming list is not supported, fallback to list and watch",
                    major = version.major,
                    minor = version.minor,
                );
                InitialListStrategy::ListWatch
            }
            Err(err) => {
                warn!(
                    message = "fetch server version failed, fallback to list and watch",
                    %err,
                );
                InitialListStrategy::ListWatch
            }
        };
        let watch_config = WatchConfig {
            initial_list_strategy,
            bookmark: true,
            ..Default::default()
        };

        let registry = Arc::new(
            Registry::builder()
                .register::<Programmer>()
                .register::<Deployment>()
                .build(),
        );
        let (recorder, broadcaster) =
            Broadcaster::new(Arc::clone(&registry), Arc::new(client.clone()));

        let mut programmers =
            Informer::<Programmer>::new(client.clone(), watch_config.clone(), RESYNC_PERIOD);
        let deployments = Informer::<Deployment>::new(client.clone(), watch_config, RESYNC_PERIOD);

        let controller = Controller::new(
            programmers.store(),
            deployments.store(),
            Arc::new(client.clone()),
            Arc::new(client),
            registry,
            recorder,
        );
        programmers.add_handler(controller.handler());

        let (mut signal_handler, mut signal_rx) = signal::SignalHandler::new();
        let signals = signal::os_signals().map_err(|err| {
            error!(message = "set up signal handlers failed", %err);
            exitcode::OSERR
        })?;
        signal_handler.forever(signals);

        let (trigger, tripwire) = Tripwire::new("shutdown");
        tokio::spawn(programmers.run(tripwire.clone()));
        tokio::spawn(deployments.run(tripwire.clone()));
        tokio::spawn(broadcaster.run(tripwire.clone()));
        let mut running = tokio::spawn(controller.run(self.workers, tripwire));

        let signal = tokio::select! {
            Some(signal) = signal_rx.recv() => signal,
            // only a failed cache sync ends the controller by itself
            result = &mut running => return exit_code(result),
        };

        match signal {
            SignalTo::Shutdown => {
                info!(message = "Shutdown signal received");
                trigger.cancel();

                tokio::select! {
                    result = &mut running => exit_code(result),
                    _ = signal_rx.recv() => {
                        info!(message = "Second signal received, exit immediately");
                        Ok(())
                    }
                }
            }
            SignalTo::Quit => {
                info!(message = "Quit signal received");
                Ok(())
            }
        }
    }
}

fn exit_code(result: Result<Result<(), Error>, JoinError>) -> Result<(), ExitCode> {
    match result {
        Ok(Ok(())) => {
            info!(message = "Programmer controller stopped");
            Ok(())
        }
        Ok(Err(Error::CacheSync(err))) => {
            error!(message = "caches never synced", %err);
            Err(exitcode::UNAVAILABLE)
        }
        Ok(Err(err)) => {
            error!(message = "controller failed", %err);
            Err(exitcode::SOFTWARE)
        }
        Err(err) => {
            error!(message = "controller panicked", %err);
            Err(exitcode::SOFTWARE)
        }
    }
}
