mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use visu_scheme::channel::ChannelState;
use visu_scheme::{Session, SvgScene, VisuConfig, WebSocketConnector, WriteForm};

use common::{collect_until, start_data_module_server, Received};

const SVG: &str = r##"<svg xmlns="http://www.w3.org/2000/svg">
  <circle id="alarm" style="fill:#888888"/>
  <text id="temp">--</text>
  <rect id="pressure"/>
</svg>"##;

fn config(ws_url: &str) -> VisuConfig {
    VisuConfig::from_toml_str(&format!(
        r##"
[client]
ws_url = "{ws_url}"
read_timeout_ms = 20

[[scheme]]
scheme_id = "boiler"
interval = 0.2

[[scheme.element]]
svg_id = "alarm"
data_module = "plc1"
data_id = "alarm"
type = "bool"
cov = true
[[scheme.element.style]]
match = "^true$"
fill = "#ff0000"

[[scheme.element]]
svg_id = "temp"
data_module = "plc1"
data_id = "temp"
type = "float"
precision = 1
[[scheme.element.style]]
text = "%% °C"

[[scheme.element]]
svg_id = "pressure"
data_module = "plc1"
data_id = "pressure"
type = "float"
write = true
min = 0
max = 10
[[scheme.element.style]]
max = 5
fill = "#00ff00"
[[scheme.element.style]]
fill = "#ffa500"
"##
    ))
    .expect("config")
}

fn plc1_reply(_module: &str, text: &str) -> Vec<String> {
    if text.contains(r#""command":"cov""#) {
        vec![r#"{"alarm": true}"#.to_string()]
    } else if text.contains(r#""command":"get""#) {
        vec![r#"{"temp": 21.456, "pressure": "7.5"}"#.to_string()]
    } else if text.contains(r#""command":"set""#) {
        vec![r#"{"status": 200, "detail": "ok"}"#.to_string()]
    } else {
        vec![r#"{"status": 400, "detail": "Invalid command"}"#.to_string()]
    }
}

fn start_session(config: &VisuConfig) -> Session<SvgScene> {
    let catalog = Arc::new(config.catalog(Some("boiler")).expect("catalog"));
    let connector = Arc::new(WebSocketConnector::new(
        config.client.ws_url.clone(),
        config.client.read_timeout,
    ));
    Session::start(catalog, connector, SvgScene::from_svg(SVG).expect("svg"))
}

fn step_until(session: &mut Session<SvgScene>, done: impl Fn(&Session<SvgScene>) -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done(session) {
        assert!(Instant::now() < deadline, "session did not reach expected state");
        session.step(Duration::from_millis(20));
    }
}

fn count(frames: &[Received], command: &str) -> usize {
    frames
        .iter()
        .filter(|frame| frame.text.contains(&format!(r#""command":"{command}""#)))
        .count()
}

#[test]
fn module_subscribes_once_and_polls_in_catalog_order() {
    let server = start_data_module_server(plc1_reply);
    let config = config(&server.ws_url);
    let mut session = start_session(&config);

    step_until(&mut session, |s| {
        s.renderer().target("temp").and_then(|t| t.text.as_deref()) == Some("21.5 °C")
    });

    let alarm = session.renderer().target("alarm").expect("alarm");
    assert_eq!(alarm.property("fill"), Some("#ff0000"));
    let pressure = session.renderer().target("pressure").expect("pressure");
    assert_eq!(pressure.property("fill"), Some("#ffa500"));

    session.shutdown();

    let frames = collect_until(&server.frames, Duration::from_secs(2), |seen| {
        count(seen, "get") >= 1
    });
    assert!(frames.iter().all(|frame| frame.module == "plc1"));
    assert_eq!(
        frames.first().map(|frame| frame.text.as_str()),
        Some(r#"{"command":"cov","data_ids":["alarm"]}"#)
    );
    let get = frames
        .iter()
        .find(|frame| frame.text.contains(r#""command":"get""#))
        .expect("get frame");
    assert_eq!(get.text, r#"{"command":"get","data_ids":["temp","pressure"]}"#);
    assert_eq!(count(&frames, "cov"), 1);
}

#[test]
fn polls_repeat_every_interval_without_resubscribing() {
    let server = start_data_module_server(plc1_reply);
    let config = config(&server.ws_url);
    let mut session = start_session(&config);

    let started = Instant::now();
    let mut frames = Vec::new();
    while count(&frames, "get") < 3 {
        assert!(started.elapsed() < Duration::from_secs(5), "polls stalled");
        session.step(Duration::from_millis(20));
        frames.extend(server.frames.try_iter());
    }
    session.shutdown();
    assert!(started.elapsed() >= Duration::from_millis(600));
    assert_eq!(count(&frames, "cov"), 1);
}

#[test]
fn validated_write_reaches_the_data_module() {
    let server = start_data_module_server(plc1_reply);
    let config = config(&server.ws_url);
    let mut session = start_session(&config);
    step_until(&mut session, |s| s.channel_state("plc1") == Some(ChannelState::Open));

    let catalog = Arc::clone(session.catalog());
    let pressure = catalog.find_by_svg_id("pressure").expect("pressure");
    let mut form = WriteForm::new(pressure);
    form.set_input("12");
    assert_eq!(form.message().as_deref(), Some("Value is more than 10"));
    assert!(session.submit(&mut form).is_err());

    form.set_input("4.5");
    session.submit(&mut form).expect("submit");
    session.shutdown();

    let frames = collect_until(&server.frames, Duration::from_secs(2), |seen| {
        count(seen, "set") >= 1
    });
    let sets: Vec<&str> = frames
        .iter()
        .filter(|frame| frame.text.contains(r#""command":"set""#))
        .map(|frame| frame.text.as_str())
        .collect();
    assert_eq!(sets, vec![r#"{"command":"set","data":{"pressure":"4.5"}}"#]);
}

#[test]
fn unreachable_module_closes_its_channel() {
    let config = config("ws://127.0.0.1:9/ws");
    let mut session = start_session(&config);
    step_until(&mut session, |s| s.channel_state("plc1") == Some(ChannelState::Closed));
    let scene = session.shutdown();
    assert!(scene.targets().all(|(_, state)| state.updates == 0));
}
