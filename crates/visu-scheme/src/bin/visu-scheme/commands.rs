//! Command handlers.

use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use crossbeam_channel::{unbounded, Sender};
use smol_str::SmolStr;
use visu_scheme::aggregate::aggregate;
use visu_scheme::cancel::CancelToken;
use visu_scheme::channel::ChannelState;
use visu_scheme::history::{ChartSink, HistoryQuery};
use visu_scheme::style::Effects;
use visu_scheme::{
    HistoryBridge, HistoryRange, HttpHistoryFetcher, Renderer, Session, SvgScene, VisuConfig,
    WebSocketConnector, WriteForm,
};

use crate::style;

pub fn check(config: &VisuConfig, scheme: Option<&str>) -> anyhow::Result<()> {
    let ids = match scheme {
        Some(id) => vec![id.to_string()],
        None => config.scheme_ids().map(str::to_string).collect(),
    };
    for id in ids {
        let catalog = config.catalog(Some(&id))?;
        println!(
            "{} {} ({} elements, every {:?})",
            style::accent(catalog.scheme_id()),
            catalog.scheme_name(),
            catalog.elements().len(),
            catalog.interval()
        );
        for (module, group) in aggregate(catalog.elements()) {
            println!(
                "  {}: {} cov, {} batched, {} single",
                style::accent(&module),
                group.cov.len(),
                group.interval_batched.len(),
                group.interval_single.len()
            );
        }
        if let Some(path) = catalog.svg_path() {
            let scene = load_scene(path)?;
            for element in catalog.elements() {
                if scene.find_target(&element.svg_id).is_none() {
                    println!(
                        "  {}",
                        style::warning(format!(
                            "{} has no target in {}",
                            element.svg_id,
                            path.display()
                        ))
                    );
                }
            }
        }
    }
    println!("{}", style::success("configuration ok"));
    Ok(())
}

pub fn run(
    config: &VisuConfig,
    scheme: Option<&str>,
    svg: Option<&Path>,
    duration: Option<f64>,
) -> anyhow::Result<()> {
    let catalog = Arc::new(config.catalog(scheme)?);
    let scene = match svg.or(catalog.svg_path()) {
        Some(path) => load_scene(path)?,
        None => SvgScene::with_targets(catalog.elements().iter().map(|e| e.svg_id.as_str())),
    };
    let mut session = Session::start(
        Arc::clone(&catalog),
        connector(config),
        ConsoleScene { scene },
    );

    let cancel = CancelToken::new();
    if let Some(seconds) = duration {
        let limit = Duration::try_from_secs_f64(seconds).context("invalid --duration")?;
        let stop = cancel.clone();
        thread::spawn(move || {
            thread::sleep(limit);
            stop.cancel();
        });
    }
    session.run_until(&cancel);
    let console = session.shutdown();
    println!("{}", style::success("final state"));
    for (id, state) in console.scene.targets() {
        if state.updates > 0 {
            println!(
                "  {} style=\"{}\" text={:?} updates={}",
                style::accent(id),
                state.style_attribute(),
                state.text.as_deref().unwrap_or(""),
                state.updates
            );
        }
    }
    Ok(())
}

pub fn write(
    config: &VisuConfig,
    scheme: Option<&str>,
    svg_id: &str,
    value: &str,
) -> anyhow::Result<()> {
    let catalog = Arc::new(config.catalog(scheme)?);
    let element = catalog.find_by_svg_id(svg_id)?;
    let mut form = WriteForm::new(element);
    form.set_input(value);
    if let Some(message) = form.message() {
        anyhow::bail!("{svg_id}: {message}");
    }
    if !form.can_submit() {
        anyhow::bail!("{svg_id}: element is not writable");
    }

    let mut session = Session::start(
        Arc::clone(&catalog),
        connector(config),
        SvgScene::with_targets([svg_id]),
    );
    let deadline = Instant::now() + Duration::from_secs(5);
    while session.channel_state(&element.data_module) == Some(ChannelState::Connecting) {
        if Instant::now() >= deadline {
            anyhow::bail!("data module {} did not open in time", element.data_module);
        }
        session.step(Duration::from_millis(50));
    }
    session.submit(&mut form)?;
    session.shutdown();
    println!(
        "{}",
        style::success(format!(
            "wrote {value} to {}/{}",
            element.data_module, element.data_id
        ))
    );
    Ok(())
}

pub fn history(
    config: &VisuConfig,
    scheme: Option<&str>,
    svg_id: &str,
    range: &str,
) -> anyhow::Result<()> {
    let catalog = config.catalog(scheme)?;
    catalog.find_by_svg_id(svg_id)?;
    let range: HistoryRange = range.parse()?;
    let fetcher = HttpHistoryFetcher::new(&config.client.http_url, config.client.history_timeout);
    let (results_tx, results_rx) = unbounded();
    let mut bridge = HistoryBridge::new(
        catalog.scheme_id(),
        Arc::new(fetcher),
        Box::new(PrintSink(results_tx)),
    );
    bridge.set_range(range);
    bridge.open(svg_id);
    if !bridge.wait(config.client.history_timeout + Duration::from_secs(1)) {
        anyhow::bail!("no history response for {svg_id}");
    }
    match results_rx.try_recv() {
        Ok(Ok(())) | Err(_) => Ok(()),
        Ok(Err(message)) => anyhow::bail!(message),
    }
}

fn connector(config: &VisuConfig) -> Arc<WebSocketConnector> {
    Arc::new(WebSocketConnector::new(
        config.client.ws_url.clone(),
        config.client.read_timeout,
    ))
}

fn load_scene(path: &Path) -> anyhow::Result<SvgScene> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    Ok(SvgScene::from_svg(&text)?)
}

/// Scene that echoes every applied update.
struct ConsoleScene {
    scene: SvgScene,
}

impl Renderer for ConsoleScene {
    type Target = SmolStr;

    fn find_target(&self, svg_id: &str) -> Option<SmolStr> {
        self.scene.find_target(svg_id)
    }

    fn apply_effects(&mut self, target: &SmolStr, effects: &Effects) {
        self.scene.apply_effects(target, effects);
        if let Some(state) = self.scene.target(target) {
            println!(
                "{} {} {}",
                style::accent(target),
                state.style_attribute(),
                state.text.as_deref().unwrap_or("")
            );
        }
    }
}

/// Prints fetched series as they arrive.
struct PrintSink(Sender<Result<(), String>>);

impl ChartSink for PrintSink {
    fn show_series(&mut self, query: &HistoryQuery, payload: &str) {
        println!(
            "{} {}",
            style::accent(&query.svg_id),
            style::success(query.range.label())
        );
        println!("{payload}");
        let _ = self.0.send(Ok(()));
    }

    fn show_error(&mut self, query: &HistoryQuery, message: &str) {
        let _ = self.0.send(Err(format!("{}: {message}", query.svg_id)));
    }
}

