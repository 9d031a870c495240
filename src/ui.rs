use core::time::Duration;
use std::{
    collections::{BTreeMap, HashMap},
    io::{self, Stdout},
    sync::Arc,
    time::Instant,
};

use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    terminal::{EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    buffer::Buffer,
    layout::{Constraint, Layout, Rect},
    prelude::CrosstermBackend,
    style::{Color, Style},
    symbols,
    widgets::{Axis, Chart, Dataset, GraphType},
    Frame, Terminal,
};
use tokio::sync::mpsc::Sender;

use self::widget::{bordered, LoadLimitsWidget, Panel};
use crate::{limits::Limits, stat::RunStat};

pub mod widget;

const TICK_INTERVAL: Duration = Duration::from_millis(500);
/// Number of points kept per dashboard plot series.
const PLOT_TAIL: usize = 48;

type CountsFn = Box<dyn Fn() -> BTreeMap<String, u64> + Send>;
type KeyMap = HashMap<KeyCode, Box<dyn FnMut() + Send>>;
type PrepareLoadLimitsFn = Box<dyn FnMut(&mut LoadLimitsWidget) + Send>;

pub(crate) fn init() -> io::Result<Terminal<CrosstermBackend<Stdout>>> {
    crossterm::terminal::enable_raw_mode()?;
    let mut stdout = io::stdout();
    crossterm::execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);

    Terminal::new(backend)
}

/// Drives the dashboard until shutdown and returns the captured final frame.
pub(crate) fn run(
    mut app: Ui,
    mut terminal: Terminal<CrosstermBackend<Stdout>>,
) -> io::Result<String> {
    let rc = app.run(&mut terminal, TICK_INTERVAL);

    crossterm::terminal::disable_raw_mode()?;
    crossterm::execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    rc
}

pub(crate) struct Ui {
    stat: Arc<RunStat>,
    limits: Limits,
    tx: Sender<()>,
    counts: CountsFn,
    key_pressed: KeyMap,
    prepare_load_limits: Option<PrepareLoadLimitsFn>,

    percentiles: Panel,
    counters: Panel,
    load_limits: LoadLimitsWidget,
    rps_title: String,

    rates: BTreeMap<String, Vec<(f64, f64)>>,
    lat_min: Vec<(f64, f64)>,
    lat_max: Vec<(f64, f64)>,
    tick: u64,
    prev_ts: Instant,
    prev_count: u64,
}

impl Ui {
    pub(crate) fn new(
        stat: Arc<RunStat>,
        limits: Limits,
        tx: Sender<()>,
        counts: CountsFn,
        key_pressed: KeyMap,
        prepare_load_limits: Option<PrepareLoadLimitsFn>,
    ) -> Self {
        Self {
            stat,
            limits,
            tx,
            counts,
            key_pressed,
            prepare_load_limits,
            percentiles: Panel::new(" Round trip latency, ms "),
            counters: Panel::new(" Request Count "),
            load_limits: LoadLimitsWidget::default(),
            rps_title: String::new(),
            rates: BTreeMap::new(),
            lat_min: Vec::new(),
            lat_max: Vec::new(),
            tick: 0,
            prev_ts: Instant::now(),
            prev_count: 0,
        }
    }

    fn run(
        &mut self,
        terminal: &mut Terminal<CrosstermBackend<Stdout>>,
        tick: Duration,
    ) -> io::Result<String> {
        loop {
            terminal.draw(|frame| self.draw(frame))?;

            let timeout = tick.saturating_sub(self.prev_ts.elapsed());
            if event::poll(timeout)? {
                if let Event::Key(key) = event::read()? {
                    if key.kind == KeyEventKind::Press {
                        self.on_key(key);
                    }
                }
            }
            if self.prev_ts.elapsed() >= tick {
                self.on_tick();
            }

            if self.stat.is_done() {
                let frame = terminal.draw(|frame| self.draw(frame))?;

                return Ok(capture(frame.buffer));
            }
        }
    }

    fn on_key(&mut self, key: KeyEvent) {
        if let Some(f) = self.key_pressed.get_mut(&key.code) {
            f();
            return;
        }

        match key.code {
            KeyCode::Char('q') => {
                _ = self.tx.try_send(());
            }
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                _ = self.tx.try_send(());
            }
            KeyCode::Right => self.limits.increase_concurrency(),
            KeyCode::Left => self.limits.decrease_concurrency(),
            KeyCode::Up => self.limits.increase_rate(),
            KeyCode::Down => self.limits.decrease_rate(),
            _ => {}
        }
    }

    fn on_tick(&mut self) {
        let now = Instant::now();
        let tick_elapsed = now.duration_since(self.prev_ts);
        self.prev_ts = now;

        let count = self.stat.success_count();
        let ela = self.stat.elapsed();
        let avg_rate = count as f64 / ela.as_secs_f64();
        let tick_rate = (count - self.prev_count) as f64 / tick_elapsed.as_secs_f64();
        self.prev_count = count;
        self.stat.set_current_req_rate(tick_rate as u64);

        let precise = self.stat.precise();
        self.percentiles.text = format!(
            "100%: {:.2}ms\n99%: {:.2}ms\n95%: {:.2}ms\n90%: {:.2}ms\n50%: {:.2}ms",
            precise.percentile(100.0),
            precise.percentile(99.0),
            precise.percentile(95.0),
            precise.percentile(90.0),
            precise.percentile(50.0),
        );

        let mut counts = (self.counts)();
        counts.insert("tot".to_string(), count);

        let err_cnt = self.stat.err_count();
        if err_cnt != 0 {
            counts.insert("err".to_string(), err_cnt);
        }

        let x = self.tick as f64;
        let mut text = String::new();
        for (name, cnt) in &counts {
            text.push_str(&format!("{name}: {cnt}\n"));

            let series = self.rates.entry(name.clone()).or_default();
            series.push((x, *cnt as f64 / ela.as_secs_f64()));
            if series.len() > PLOT_TAIL {
                series.remove(0);
            }
        }
        self.counters.text = text;

        let last_err = self
            .stat
            .last_err_text()
            .map(|e| format!("ERR: {e}"))
            .unwrap_or_default();
        self.load_limits.title = " Load Limits ".to_string();
        self.load_limits.text = format!(
            "Concurrency: {}, <Right>/<Left>: ±5%\nRate Limit: {}, <Up>/<Down>: ±5%\n{}",
            self.stat.concurrency_limit(),
            self.stat.rate_limit(),
            last_err,
        );
        if let Some(prepare) = &mut self.prepare_load_limits {
            prepare(&mut self.load_limits);
        }

        self.rps_title = format!(
            " Press Q or Ctrl+C to quit | avg rps: {:.2}, current rps: {:.2}, elapsed: {:?} ",
            avg_rate,
            tick_rate,
            round_to_tick(ela),
        );

        let rolling = self.stat.rolling();
        self.lat_min.push((x, rolling.min()));
        self.lat_max.push((x, rolling.max()));
        if self.lat_min.len() > PLOT_TAIL {
            self.lat_min.remove(0);
            self.lat_max.remove(0);
        }
        rolling.reset();

        self.tick += 1;
    }

    fn draw(&mut self, frame: &mut Frame) {
        let [top, rps, latency] = Layout::vertical([
            Constraint::Length(7),
            Constraint::Length(8),
            Constraint::Min(0),
        ])
        .areas(frame.area());
        let [percentiles, counters, limits] = Layout::horizontal([
            Constraint::Length(30),
            Constraint::Length(30),
            Constraint::Min(40),
        ])
        .areas(top);

        self.percentiles.draw(frame, percentiles);
        self.counters.draw(frame, counters);
        self.load_limits.draw(frame, limits);
        self.draw_rps(frame, rps);
        self.draw_latency(frame, latency);
    }

    fn draw_rps(&self, frame: &mut Frame, area: Rect) {
        const COLORS: [Color; 6] = [
            Color::Cyan,
            Color::Yellow,
            Color::Green,
            Color::Magenta,
            Color::Blue,
            Color::Red,
        ];

        let block = bordered(&self.rps_title);

        let mut datasets = Vec::new();
        let (mut x_min, mut x_max, mut y_max) = (f64::MAX, 0.0f64, 1.0f64);

        for (idx, (name, series)) in self.rates.iter().enumerate() {
            if series.len() < 2 {
                continue;
            }

            for (x, y) in series {
                x_min = x_min.min(*x);
                x_max = x_max.max(*x);
                y_max = y_max.max(*y);
            }

            datasets.push(
                Dataset::default()
                    .name(name.clone())
                    .marker(symbols::Marker::Braille)
                    .graph_type(GraphType::Line)
                    .style(Style::default().fg(COLORS[idx % COLORS.len()]))
                    .data(series),
            );
        }

        if datasets.is_empty() {
            frame.render_widget(block, area);
            return;
        }

        let chart = Chart::new(datasets)
            .block(block)
            .x_axis(Axis::default().bounds([x_min, x_max]))
            .y_axis(Axis::default().bounds([0.0, y_max * 1.1]));

        frame.render_widget(chart, area);
    }

    fn draw_latency(&self, frame: &mut Frame, area: Rect) {
        let block = bordered(" Min/Max Latency, ms ");

        if self.lat_min.len() < 2 {
            frame.render_widget(block, area);
            return;
        }

        let y_max = self
            .lat_max
            .iter()
            .map(|(_, y)| *y)
            .fold(1.0f64, f64::max);

        let datasets = vec![
            Dataset::default()
                .name("min")
                .marker(symbols::Marker::Braille)
                .graph_type(GraphType::Line)
                .style(Style::default().fg(Color::Green))
                .data(&self.lat_min),
            Dataset::default()
                .name("max")
                .marker(symbols::Marker::Braille)
                .graph_type(GraphType::Line)
                .style(Style::default().fg(Color::Red))
                .data(&self.lat_max),
        ];

        let first = self.lat_min[0].0;
        let last = self.lat_min[self.lat_min.len() - 1].0;
        let chart = Chart::new(datasets)
            .block(block)
            .x_axis(Axis::default().bounds([first, last]))
            .y_axis(Axis::default().bounds([0.0, y_max * 1.1]));

        frame.render_widget(chart, area);
    }
}

/// Serializes the rendered cell grid into plain text, trimming trailing
/// whitespace per row.
fn capture(buf: &Buffer) -> String {
    let mut out = String::new();

    for y in buf.area.top()..buf.area.bottom() {
        let mut line = String::new();
        for x in buf.area.left()..buf.area.right() {
            line.push_str(buf[(x, y)].symbol());
        }

        out.push_str(line.trim_end_matches([' ', '\0']));
        out.push('\n');
    }

    out.trim_matches(['\n', ' ', '\0']).to_string()
}

#[inline]
fn round_to_tick(d: Duration) -> Duration {
    let ticks = (d.as_secs_f64() / TICK_INTERVAL.as_secs_f64()).round() as u32;

    TICK_INTERVAL * ticks
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::limits::Limits;

    fn test_ui(stat: Arc<RunStat>, handle: tokio::runtime::Handle) -> (Ui, mpsc::Receiver<()>) {
        let (tx, rx) = mpsc::channel(1);
        let ui = Ui::new(
            stat.clone(),
            Limits::new(stat, handle),
            tx,
            Box::new(BTreeMap::new),
            HashMap::new(),
            None,
        );

        (ui, rx)
    }

    #[test]
    fn capture_trims_rows() {
        let buf = Buffer::with_lines(vec!["hello   ", "  world ", "        "]);

        assert_eq!("hello\n  world", capture(&buf));
    }

    #[test]
    fn tick_collects_series_and_resets_rolling() {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let stat = Arc::new(RunStat::new(5, 0));
        let (mut ui, _rx) = test_ui(stat.clone(), rt.handle().clone());

        for _ in 0..PLOT_TAIL + 10 {
            stat.on_round_trip(Duration::from_millis(2), Duration::from_secs(1));
            ui.on_tick();
        }

        let tot = &ui.rates["tot"];
        assert_eq!(PLOT_TAIL, tot.len());
        assert_eq!(PLOT_TAIL, ui.lat_min.len());
        // The rolling histogram is cleared at the end of every tick.
        assert_eq!(0, stat.rolling().count());
        assert!(ui.counters.text.contains("tot:"));
    }

    #[test]
    fn quit_key_pushes_exit() {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let stat = Arc::new(RunStat::new(5, 0));
        let (mut ui, mut rx) = test_ui(stat, rt.handle().clone());

        ui.on_key(KeyEvent::new(KeyCode::Char('q'), KeyModifiers::NONE));
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn registered_keys_shadow_builtins() {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let stat = Arc::new(RunStat::new(20, 0));
        let (mut ui, _rx) = test_ui(stat.clone(), rt.handle().clone());

        let fired = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = fired.clone();
        ui.key_pressed.insert(
            KeyCode::Right,
            Box::new(move || flag.store(true, std::sync::atomic::Ordering::SeqCst)),
        );

        ui.on_key(KeyEvent::new(KeyCode::Right, KeyModifiers::NONE));
        assert!(fired.load(std::sync::atomic::Ordering::SeqCst));
        // The built-in concurrency binding must not have fired.
        assert_eq!(20, stat.concurrency_limit());
    }
}
