//! Live session of one scheme.
//!
//! The session thread owns the render state. Socket workers only report
//! [`ChannelEvent`]s; every value is routed and every poll is fired from
//! [`Session::step`], so no two updates ever touch the renderer at once.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use indexmap::IndexMap;
use smol_str::SmolStr;
use tracing::{debug, info};

use crate::aggregate::aggregate;
use crate::cancel::CancelToken;
use crate::catalog::{Catalog, Element};
use crate::channel::{ChannelEvent, ChannelState, Connector, TelemetryChannel};
use crate::error::{SchemeError, WriteError};
use crate::history::HistoryBridge;
use crate::protocol::Command;
use crate::router::{RouteOutcome, Renderer, ValueRouter};
use crate::write::{build_write, WriteForm};

const IDLE_WAIT: Duration = Duration::from_millis(100);

/// Channels, router and history bridge of the scheme being shown.
#[derive(Debug)]
pub struct Session<R> {
    catalog: Arc<Catalog>,
    router: ValueRouter<R>,
    channels: IndexMap<SmolStr, TelemetryChannel>,
    events_rx: Receiver<ChannelEvent>,
    // Held so `step` keeps waiting after every worker has exited.
    _events_tx: Sender<ChannelEvent>,
    history: Option<HistoryBridge>,
}

impl<R: Renderer> Session<R> {
    /// Opens one telemetry channel per data module of `catalog`.
    pub fn start(catalog: Arc<Catalog>, connector: Arc<dyn Connector>, renderer: R) -> Self {
        let (events_tx, events_rx) = unbounded();
        let channels = aggregate(catalog.elements())
            .into_iter()
            .map(|(module, group)| {
                let channel = TelemetryChannel::spawn(
                    module.clone(),
                    group,
                    catalog.interval(),
                    Arc::clone(&connector),
                    events_tx.clone(),
                );
                (module, channel)
            })
            .collect::<IndexMap<_, _>>();
        info!(
            "scheme {} started with {} data modules",
            catalog.scheme_id(),
            channels.len()
        );
        Self {
            router: ValueRouter::new(Arc::clone(&catalog), renderer),
            catalog,
            channels,
            events_rx,
            _events_tx: events_tx,
            history: None,
        }
    }

    #[must_use]
    pub fn with_history(mut self, history: HistoryBridge) -> Self {
        self.history = Some(history);
        self
    }

    pub fn history_mut(&mut self) -> Option<&mut HistoryBridge> {
        self.history.as_mut()
    }

    #[must_use]
    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn renderer(&self) -> &R {
        self.router.renderer()
    }

    #[must_use]
    pub fn channel_state(&self, data_module: &str) -> Option<ChannelState> {
        self.channels.get(data_module).map(TelemetryChannel::state)
    }

    /// Fires due polls, then handles channel events for at most `max_wait`
    /// or until the next poll is due. Returns the number of values applied
    /// to a target.
    pub fn step(&mut self, max_wait: Duration) -> usize {
        let now = Instant::now();
        for channel in self.channels.values_mut() {
            channel.on_tick(now);
        }
        let wait = self
            .channels
            .values()
            .filter_map(TelemetryChannel::next_deadline)
            .min()
            .map_or(max_wait, |due| {
                max_wait.min(due.saturating_duration_since(now))
            });

        let mut applied = 0;
        match self.events_rx.recv_timeout(wait) {
            Ok(event) => applied += self.handle(event),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => {}
        }
        while let Ok(event) = self.events_rx.try_recv() {
            applied += self.handle(event);
        }
        if let Some(history) = self.history.as_mut() {
            history.drain();
        }
        applied
    }

    /// Steps until `cancel` is set.
    pub fn run_until(&mut self, cancel: &CancelToken) {
        while !cancel.is_cancelled() {
            self.step(IDLE_WAIT);
        }
    }

    fn handle(&mut self, event: ChannelEvent) -> usize {
        match event {
            ChannelEvent::Opened { module } => {
                if let Some(channel) = self.channels.get_mut(&module) {
                    channel.on_open(Instant::now());
                }
                0
            }
            ChannelEvent::Frame { module, text } => {
                let Some(channel) = self.channels.get(&module) else {
                    return 0;
                };
                let mut applied = 0;
                for (data_id, value) in channel.decode_frame(&text) {
                    if self.router.route(&module, &data_id, &value) == RouteOutcome::Applied {
                        applied += 1;
                    }
                }
                applied
            }
            ChannelEvent::Failed { module, error } => {
                if let Some(channel) = self.channels.get_mut(&module) {
                    channel.on_failed(&error);
                }
                0
            }
            ChannelEvent::Closed { module } => {
                if let Some(channel) = self.channels.get_mut(&module) {
                    channel.on_closed();
                }
                0
            }
        }
    }

    /// Queues `command` on the channel of `element`'s data module.
    pub fn send(&self, element: &Element, command: &Command) -> Result<(), SchemeError> {
        let channel = self
            .channels
            .get(&element.data_module)
            .ok_or_else(|| SchemeError::ChannelClosed(element.data_module.clone()))?;
        if channel.state() == ChannelState::Closed {
            return Err(SchemeError::ChannelClosed(element.data_module.clone()));
        }
        channel.send(command)
    }

    /// Validates the form input and sends it as a `set` command. The input
    /// is cleared only once the command is queued.
    pub fn submit(&self, form: &mut WriteForm<'_>) -> Result<(), WriteError> {
        let element = form.element();
        let command = build_write(element, form.input())?;
        self.send(element, &command)?;
        debug!("write queued for {}", element.svg_id);
        form.set_input(String::new());
        Ok(())
    }

    /// Shows the history of `svg_id` in the detail view.
    pub fn open_detail(&mut self, svg_id: &str) -> Result<(), SchemeError> {
        self.catalog.find_by_svg_id(svg_id)?;
        if let Some(history) = self.history.as_mut() {
            history.open(svg_id);
        }
        Ok(())
    }

    /// Closes every channel and hands the renderer back.
    pub fn shutdown(mut self) -> R {
        for channel in self.channels.values_mut() {
            channel.close();
        }
        if let Some(history) = self.history.as_mut() {
            history.close();
        }
        info!("scheme {} stopped", self.catalog.scheme_id());
        self.router.into_renderer()
    }
}
