//! Terminal dashboard.
//!
//! Renders three panels on a ~4 Hz tick: the top-N requested URL slugs, the
//! request totals over a ladder of trailing intervals, and the scrollable
//! alert history, plus a one-line current detector state. Input: `q` or
//! Ctrl-C quits (fires the shared cancellation token), `j`/`k` scroll the
//! alert list, `g`/`G` jump to its ends.

use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::style::{Color, Style};
use ratatui::widgets::{Block, Borders, List, ListItem, ListState, Paragraph};
use ratatui::DefaultTerminal;

use crate::alert::AlertDetector;
use crate::cancel::CancelToken;
use crate::routes::{top_n_requests, RequestCounter};

/// Shared, append-only alert history fed by the notification drain.
pub type AlertLog = Arc<Mutex<Vec<String>>>;

/// Trailing windows shown in the interval-counts panel.
const INTERVALS: &[(&str, u64)] = &[
    ("1m", 60),
    ("5m", 300),
    ("15m", 900),
    ("30m", 1_800),
    ("60m", 3_600),
    ("24h", 86_400),
];

/// How long the event loop waits for input before redrawing.
const RENDER_TICK: Duration = Duration::from_millis(250);

pub struct Dashboard {
    pub detector: Arc<AlertDetector>,
    pub counter: Arc<RequestCounter>,
    pub alerts: AlertLog,
    pub top_n: usize,
    pub cancel: CancelToken,
}

impl Dashboard {
    /// Run the dashboard until `q`, Ctrl-C, or external cancellation. Owns
    /// the terminal for its whole lifetime and restores it on the way out.
    pub fn run(self) -> anyhow::Result<()> {
        let terminal = ratatui::init();
        let result = self.event_loop(terminal);
        ratatui::restore();
        result
    }

    fn event_loop(&self, mut terminal: DefaultTerminal) -> anyhow::Result<()> {
        let mut alert_state = ListState::default();
        loop {
            if self.cancel.is_cancelled() {
                return Ok(());
            }

            let top = self.top_lines();
            let intervals = self.interval_lines();
            let alerts = self
                .alerts
                .lock()
                .expect("alert log lock poisoned")
                .clone();
            let status = self.detector.get_state().to_string();

            // Follow the tail unless the user has scrolled.
            if alert_state.selected().is_none() && !alerts.is_empty() {
                alert_state.select(Some(alerts.len() - 1));
            }

            terminal.draw(|frame| {
                let rows = Layout::default()
                    .direction(Direction::Vertical)
                    .constraints([
                        Constraint::Length(self.top_n as u16 + 2),
                        Constraint::Min(5),
                        Constraint::Length(3),
                    ])
                    .split(frame.area());
                let columns = Layout::default()
                    .direction(Direction::Horizontal)
                    .constraints([Constraint::Percentage(66), Constraint::Percentage(34)])
                    .split(rows[0]);

                let top_list = List::new(top.iter().cloned().map(ListItem::new))
                    .style(Style::default().fg(Color::Yellow))
                    .block(
                        Block::default()
                            .title(format!("Top {} HTTP Requested Paths", self.top_n))
                            .borders(Borders::ALL),
                    );
                frame.render_widget(top_list, columns[0]);

                let interval_list = List::new(intervals.iter().cloned().map(ListItem::new))
                    .style(Style::default().fg(Color::Blue))
                    .block(
                        Block::default()
                            .title("HTTP Request Interval Counts")
                            .borders(Borders::ALL),
                    );
                frame.render_widget(interval_list, columns[1]);

                let alert_list = List::new(alerts.iter().cloned().map(ListItem::new))
                    .style(Style::default().fg(Color::Red))
                    .highlight_style(Style::default().fg(Color::White))
                    .block(
                        Block::default()
                            .title("HTTP Req Rate Alerts")
                            .borders(Borders::ALL),
                    );
                frame.render_stateful_widget(alert_list, rows[1], &mut alert_state);

                let status_line = Paragraph::new(status.clone())
                    .block(Block::default().title("Detector State").borders(Borders::ALL));
                frame.render_widget(status_line, rows[2]);
            })?;

            if !event::poll(RENDER_TICK)? {
                continue;
            }
            if let Event::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                let alert_count = self
                    .alerts
                    .lock()
                    .expect("alert log lock poisoned")
                    .len();
                match key.code {
                    KeyCode::Char('q') => {
                        self.cancel.cancel();
                        return Ok(());
                    }
                    KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                        self.cancel.cancel();
                        return Ok(());
                    }
                    KeyCode::Char('j') | KeyCode::Down => {
                        if alert_count > 0 {
                            let next = alert_state
                                .selected()
                                .map_or(0, |i| (i + 1).min(alert_count - 1));
                            alert_state.select(Some(next));
                        }
                    }
                    KeyCode::Char('k') | KeyCode::Up => {
                        if alert_count > 0 {
                            let prev = alert_state.selected().map_or(0, |i| i.saturating_sub(1));
                            alert_state.select(Some(prev));
                        }
                    }
                    KeyCode::Char('g') | KeyCode::Home => {
                        if alert_count > 0 {
                            alert_state.select(Some(0));
                        }
                    }
                    KeyCode::Char('G') | KeyCode::End => {
                        if alert_count > 0 {
                            alert_state.select(Some(alert_count - 1));
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    fn top_lines(&self) -> Vec<String> {
        let snapshot = self.counter.export();
        top_n_requests(&snapshot, self.top_n)
            .into_iter()
            .map(|entry| format!("{:>10}  {}", entry.count, entry.path))
            .collect()
    }

    fn interval_lines(&self) -> Vec<String> {
        let now = SystemTime::now();
        INTERVALS
            .iter()
            .map(|&(label, secs)| {
                let count = self
                    .detector
                    .get_span_count(now - Duration::from_secs(secs), now);
                format!("{label:>4}: {count}")
            })
            .collect()
    }
}
