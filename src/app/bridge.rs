use log::{info, warn};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

use crate::app::console::{render_listing, resolve_discovered, resolve_saved, resolve_sink, ConsoleCommand, HELP};
use crate::config::io::PersistenceGateway;
use crate::device::coordinator::ConnectionCoordinator;
use crate::device::transport::{LogNotices, Timer, Transport};
use crate::device::types::DeviceEvent;
use crate::output::router::{OutputRouter, SinkProvider};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Continue(Option<String>),
    Quit,
}

/// The single event loop of the application: device events drive the coordinator, framed
/// messages go to the router, console commands act on both.
pub struct Bridge<T, S, M, P> {
    coordinator: ConnectionCoordinator<T, S, LogNotices, M>,
    router: OutputRouter<P>,
    notices: LogNotices,
}

impl<T, S, M, P> Bridge<T, S, M, P>
where
    T: Transport,
    S: PersistenceGateway,
    M: Timer,
    P: SinkProvider,
{
    pub fn new(coordinator: ConnectionCoordinator<T, S, LogNotices, M>, router: OutputRouter<P>, notices: LogNotices) -> Self {
        Bridge {
            coordinator,
            router,
            notices,
        }
    }

    pub fn coordinator(&self) -> &ConnectionCoordinator<T, S, LogNotices, M> {
        &self.coordinator
    }

    pub fn router(&self) -> &OutputRouter<P> {
        &self.router
    }

    pub fn handle_device_event(&mut self, event: DeviceEvent) {
        let activation = matches!(
            event,
            DeviceEvent::Foreground(true) | DeviceEvent::Rescan | DeviceEvent::RadioStateChanged(true)
        );

        for message in self.coordinator.handle_event(event) {
            self.router.route(&message);
        }

        if activation {
            self.router.refresh();
        }
    }

    /// Select an output by position, identifier or name.
    pub fn select_destination(&mut self, target: &str) -> Result<bool, String> {
        let Some(sink) = resolve_sink(self.router.sinks(), target) else {
            return Err(format!("No destination '{}'", target));
        };

        let sink_id = sink.id.clone();
        self.router.toggle(&sink_id).map_err(|err| err.to_string())
    }

    pub fn refresh_sinks(&mut self) {
        self.router.refresh();
    }

    pub fn handle_command(&mut self, command: ConsoleCommand) -> CommandOutcome {
        let reply = match command {
            ConsoleCommand::List => Some(self.listing()),
            ConsoleCommand::Rescan => {
                self.handle_device_event(DeviceEvent::Rescan);
                None
            },
            ConsoleCommand::Connect(target) => {
                match resolve_discovered(self.coordinator.registry(), &target) {
                    Some(id) => {
                        if !self.coordinator.connect_discovered(&id) {
                            Some(format!("Already connecting to {}", id))
                        } else {
                            None
                        }
                    },
                    None => Some(format!("No new device '{}'", target)),
                }
            },
            ConsoleCommand::Remove(target) => {
                match resolve_saved(self.coordinator.registry(), &target) {
                    Some(id) => {
                        self.coordinator.remove_device(&id);
                        None
                    },
                    None => Some(format!("No saved device '{}'", target)),
                }
            },
            ConsoleCommand::Select(target) => match self.select_destination(&target) {
                Ok(true) => self.router.active().map(|sink| format!("Routing to {}", sink.name)),
                Ok(false) => Some("Not routing".to_string()),
                Err(message) => Some(message),
            },
            ConsoleCommand::Deselect => {
                self.router.deselect();
                Some("Not routing".to_string())
            },
            ConsoleCommand::Refresh => {
                self.router.refresh();
                Some(self.listing())
            },
            ConsoleCommand::Pause => {
                self.handle_device_event(DeviceEvent::Foreground(false));
                None
            },
            ConsoleCommand::Resume => {
                self.handle_device_event(DeviceEvent::Foreground(true));
                None
            },
            ConsoleCommand::Status => Some(self.notices.status()),
            ConsoleCommand::Help => Some(HELP.to_string()),
            ConsoleCommand::Quit => return CommandOutcome::Quit,
        };

        CommandOutcome::Continue(reply)
    }

    fn listing(&self) -> String {
        render_listing(
            self.coordinator.registry(),
            self.router.sinks(),
            self.router.active(),
            &self.notices.status(),
        )
    }

    /// Runs until `cancel` is cancelled, the console quits or every event sender is gone.
    /// Connections are dropped before returning.
    pub async fn run(
        mut self,
        mut events: UnboundedReceiver<DeviceEvent>,
        mut commands: UnboundedReceiver<ConsoleCommand>,
        cancel: CancellationToken,
    ) {
        info!("Bridge running; type 'help' for commands");

        'mainloop: loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    break 'mainloop;
                },
                event = events.recv() => match event {
                    Some(event) => self.handle_device_event(event),
                    None => {
                        warn!("Device event channel closed");
                        break 'mainloop;
                    },
                },
                Some(command) = commands.recv() => match self.handle_command(command) {
                    CommandOutcome::Continue(Some(reply)) => println!("{}", reply),
                    CommandOutcome::Continue(None) => {},
                    CommandOutcome::Quit => break 'mainloop,
                },
            }
        }

        self.coordinator.shutdown();
    }
}
