//! Full-screen live view of the device log.

use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use mbtik::{ClientConfig, DecodedFrame, LogSink, Session, SessionError, Transport};
use ratatui::{prelude::*, widgets::*};
use std::collections::VecDeque;
use std::io;
use std::time::{Duration, Instant};
use tracing::warn;

const MAX_LINES: usize = 500;

struct Monitor {
    lines: VecDeque<DecodedFrame>,
    status: String,
    timestamp: bool,
    entries: usize,
    sink: Option<LogSink>,
}

impl Monitor {
    fn push(&mut self, decoded: DecodedFrame) {
        if let Some(sink) = self.sink.as_mut() {
            if let Err(err) = sink.write_line(&decoded.to_string()) {
                warn!("{}", err);
                self.status = format!("Error: {}", err);
                self.sink = None;
            }
        }
        if self.lines.len() == MAX_LINES {
            self.lines.pop_front();
        }
        self.lines.push_back(decoded);
        self.entries += 1;
    }
}

/// Polls the log until the operator presses `q` or `Esc`.
pub fn run(session: &Session, transport: &mut dyn Transport, config: &ClientConfig) -> io::Result<()> {
    let sink = match &config.log_file {
        Some(path) => match LogSink::open(path, config.flush_every) {
            Ok(sink) => Some(sink),
            Err(err) => {
                eprintln!("[ERROR] {}", err);
                None
            }
        },
        None => None,
    };

    let mut monitor = Monitor {
        lines: VecDeque::new(),
        status: "Polling".to_string(),
        timestamp: config.timestamp,
        entries: 0,
        sink,
    };

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout))?;

    let result = event_loop(&mut terminal, &mut monitor, session, transport, config.log_interval());

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    result
}

fn event_loop<B: Backend>(
    terminal: &mut Terminal<B>,
    monitor: &mut Monitor,
    session: &Session,
    transport: &mut dyn Transport,
    interval: Duration,
) -> io::Result<()> {
    let decoder = session.decoder();
    let product = session.product();
    let mut last_poll: Option<Instant> = None;
    let mut polling = true;

    loop {
        if polling && last_poll.map_or(true, |at| at.elapsed() >= interval) {
            last_poll = Some(Instant::now());
            match session.poll_log(transport) {
                Ok(Some(frame)) => {
                    monitor.push(decoder.decode(&frame, monitor.timestamp));
                    monitor.status = "Polling".to_string();
                }
                Ok(None) => {}
                Err(SessionError::Transport(err)) if err.is_transient() => {
                    monitor.status = format!("Error: {}", err);
                }
                Err(err) => {
                    monitor.status = format!("Error: {}", err);
                    polling = false;
                }
            }
        }

        terminal.draw(|f| draw(f, monitor, &product.name))?;

        if event::poll(Duration::from_millis(20))? {
            if let Event::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                match key.code {
                    KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc => return Ok(()),
                    KeyCode::Char('t') | KeyCode::Char('T') => monitor.timestamp = !monitor.timestamp,
                    _ => {}
                }
            }
        }
    }
}

fn frame_line(decoded: &DecodedFrame) -> Line<'static> {
    let mut spans = Vec::with_capacity(decoded.segments.len() * 2 + 1);
    if let Some(timestamp) = &decoded.timestamp {
        spans.push(Span::styled(format!("{}, ", timestamp), Style::new().dark_gray()));
    }
    for (i, segment) in decoded.segments.iter().enumerate() {
        if i > 0 {
            spans.push(Span::raw(", "));
        }
        let style = if segment.anomalous {
            Style::new().red().bold()
        } else {
            Style::new().white()
        };
        spans.push(Span::styled(segment.text.clone(), style));
    }
    Line::from(spans)
}

fn draw(f: &mut Frame, monitor: &Monitor, product: &str) {
    let root = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(0), Constraint::Length(1)])
        .split(f.size());

    let status_color = if monitor.status.starts_with("Error") {
        Color::Red
    } else {
        Color::Green
    };

    let visible = root[0].height.saturating_sub(2) as usize;
    let lines: Vec<Line> = monitor
        .lines
        .iter()
        .skip(monitor.lines.len().saturating_sub(visible))
        .map(frame_line)
        .collect();

    f.render_widget(
        Paragraph::new(lines).block(
            Block::default()
                .borders(Borders::ALL)
                .border_type(BorderType::Rounded)
                .border_style(Style::new().cyan())
                .title(Line::from(vec![
                    Span::raw(format!(" {}  -  ", product)),
                    Span::styled(monitor.status.clone(), Style::new().fg(status_color).bold()),
                    Span::raw(format!("  ({} entries) ", monitor.entries)),
                ])),
        ),
        root[0],
    );

    f.render_widget(
        Paragraph::new(Line::from(vec![
            Span::styled(" t ", Style::new().black().on_dark_gray()),
            Span::raw(if monitor.timestamp {
                " timestamps off  "
            } else {
                " timestamps on  "
            }),
            Span::styled(" q ", Style::new().black().on_red()),
            Span::raw(" back to menu"),
        ]))
        .alignment(Alignment::Center),
        root[1],
    );
}
