//! Historical series requests for the element detail view.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use smol_str::SmolStr;
use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::error::SchemeError;

/// Time window of a history request, as an offset from now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HistoryRange {
    FiveMinutes,
    ThirtyMinutes,
    #[default]
    Hour,
    TwelveHours,
    Day,
    Week,
    Month,
}

impl HistoryRange {
    pub const ALL: [Self; 7] = [
        Self::FiveMinutes,
        Self::ThirtyMinutes,
        Self::Hour,
        Self::TwelveHours,
        Self::Day,
        Self::Week,
        Self::Month,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FiveMinutes => "-5m",
            Self::ThirtyMinutes => "-30m",
            Self::Hour => "-1h",
            Self::TwelveHours => "-12h",
            Self::Day => "-1d",
            Self::Week => "-7d",
            Self::Month => "-30d",
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::FiveMinutes => "last 5 minutes",
            Self::ThirtyMinutes => "last 30 minutes",
            Self::Hour => "last hour",
            Self::TwelveHours => "last 12 hours",
            Self::Day => "last day",
            Self::Week => "last week",
            Self::Month => "last month",
        }
    }
}

impl fmt::Display for HistoryRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HistoryRange {
    type Err = SchemeError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let text = text.trim();
        Self::ALL
            .into_iter()
            .find(|range| range.as_str() == text)
            .ok_or_else(|| {
                let known = Self::ALL.map(Self::as_str).join(", ");
                SchemeError::History(
                    format!("unknown range '{text}' (expected one of {known})").into(),
                )
            })
    }
}

/// One request: the series of one element over one range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryQuery {
    pub scheme_id: SmolStr,
    pub svg_id: SmolStr,
    pub range: HistoryRange,
}

impl HistoryQuery {
    #[must_use]
    pub fn path(&self) -> String {
        format!(
            "/schemes/{}/influx/{}",
            urlencoding::encode(&self.scheme_id),
            urlencoding::encode(&self.svg_id)
        )
    }
}

/// Source of raw time-series payloads.
pub trait HistoryFetcher: Send + Sync {
    fn fetch(&self, query: &HistoryQuery) -> Result<String, SchemeError>;
}

/// Receives fetched series; drawing them is up to the implementation.
pub trait ChartSink {
    fn show_series(&mut self, query: &HistoryQuery, payload: &str);

    /// Called on failure. The previously shown series stays in place.
    fn show_error(&mut self, query: &HistoryQuery, message: &str);
}

/// Fetches `{base_url}/schemes/{scheme}/influx/{svg_id}?limit={range}`.
#[derive(Debug, Clone)]
pub struct HttpHistoryFetcher {
    base_url: String,
    agent: ureq::Agent,
}

impl HttpHistoryFetcher {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build();
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            agent: ureq::Agent::new_with_config(config),
        }
    }

    #[must_use]
    pub fn url(&self, query: &HistoryQuery) -> String {
        format!("{}{}", self.base_url, query.path())
    }
}

impl HistoryFetcher for HttpHistoryFetcher {
    fn fetch(&self, query: &HistoryQuery) -> Result<String, SchemeError> {
        let url = self.url(query);
        let mut response = self
            .agent
            .get(&url)
            .query("limit", query.range.as_str())
            .call()
            .map_err(|err| SchemeError::History(format!("{url}: {err}").into()))?;
        let status = response.status().as_u16();
        if status != 200 {
            return Err(SchemeError::History(
                format!("{url} returned status {status}").into(),
            ));
        }
        response
            .body_mut()
            .read_to_string()
            .map_err(|err| SchemeError::History(format!("{url}: {err}").into()))
    }
}

#[derive(Debug)]
struct Delivery {
    generation: u64,
    query: HistoryQuery,
    outcome: Result<String, SchemeError>,
}

/// Issues history requests for the element shown in the detail view.
///
/// Selecting another element or range supersedes the request in flight:
/// its token is cancelled and a late response is discarded.
pub struct HistoryBridge {
    scheme_id: SmolStr,
    fetcher: Arc<dyn HistoryFetcher>,
    sink: Box<dyn ChartSink>,
    range: HistoryRange,
    element: Option<SmolStr>,
    generation: u64,
    in_flight: Option<CancelToken>,
    results_tx: Sender<Delivery>,
    results_rx: Receiver<Delivery>,
}

impl fmt::Debug for HistoryBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HistoryBridge")
            .field("scheme_id", &self.scheme_id)
            .field("range", &self.range)
            .field("element", &self.element)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

impl HistoryBridge {
    pub fn new(
        scheme_id: &str,
        fetcher: Arc<dyn HistoryFetcher>,
        sink: Box<dyn ChartSink>,
    ) -> Self {
        let (results_tx, results_rx) = unbounded();
        Self {
            scheme_id: SmolStr::new(scheme_id),
            fetcher,
            sink,
            range: HistoryRange::default(),
            element: None,
            generation: 0,
            in_flight: None,
            results_tx,
            results_rx,
        }
    }

    #[must_use]
    pub fn range(&self) -> HistoryRange {
        self.range
    }

    #[must_use]
    pub fn element(&self) -> Option<&str> {
        self.element.as_deref()
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Shows the detail view for `svg_id`, requesting its series.
    pub fn open(&mut self, svg_id: &str) {
        if self.element.as_deref() == Some(svg_id) {
            return;
        }
        self.element = Some(SmolStr::new(svg_id));
        self.request();
    }

    pub fn set_range(&mut self, range: HistoryRange) {
        if self.range == range {
            return;
        }
        self.range = range;
        if self.element.is_some() {
            self.request();
        }
    }

    /// Re-issues the request for the current element and range.
    pub fn refresh(&mut self) {
        if self.element.is_some() {
            self.request();
        }
    }

    pub fn close(&mut self) {
        self.cancel_in_flight();
        self.element = None;
    }

    fn cancel_in_flight(&mut self) {
        if let Some(token) = self.in_flight.take() {
            token.cancel();
        }
    }

    fn request(&mut self) {
        let Some(svg_id) = self.element.clone() else {
            return;
        };
        self.cancel_in_flight();
        self.generation += 1;
        let query = HistoryQuery {
            scheme_id: self.scheme_id.clone(),
            svg_id,
            range: self.range,
        };
        debug!(
            "requesting history for {} over {}",
            query.svg_id, query.range
        );
        let token = CancelToken::new();
        self.in_flight = Some(token.clone());
        let generation = self.generation;
        let fetcher = Arc::clone(&self.fetcher);
        let results = self.results_tx.clone();
        thread::spawn(move || {
            if token.is_cancelled() {
                return;
            }
            let outcome = fetcher.fetch(&query);
            if token.is_cancelled() {
                return;
            }
            let _ = results.send(Delivery {
                generation,
                query,
                outcome,
            });
        });
    }

    /// Hands finished responses to the sink without blocking.
    pub fn drain(&mut self) -> usize {
        let mut delivered = 0;
        while let Ok(delivery) = self.results_rx.try_recv() {
            delivered += usize::from(self.deliver(delivery));
        }
        delivered
    }

    /// Blocks until the current request finishes or `timeout` elapses.
    pub fn wait(&mut self, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        while self.in_flight.is_some() {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            match self.results_rx.recv_timeout(remaining) {
                Ok(delivery) => {
                    if self.deliver(delivery) {
                        return true;
                    }
                }
                Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => return false,
            }
        }
        false
    }

    fn deliver(&mut self, delivery: Delivery) -> bool {
        if delivery.generation != self.generation {
            debug!(
                "discarding superseded history response for {} over {}",
                delivery.query.svg_id, delivery.query.range
            );
            return false;
        }
        self.in_flight = None;
        match delivery.outcome {
            Ok(payload) => self.sink.show_series(&delivery.query, &payload),
            Err(err) => {
                warn!("history for {}: {err}", delivery.query.svg_id);
                self.sink.show_error(&delivery.query, &err.to_string());
            }
        }
        true
    }
}
