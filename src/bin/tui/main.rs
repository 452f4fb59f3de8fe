mod app;

use std::io;
use std::time::Duration;

use app::{format_clock, format_hashrate, format_ms, format_opt, format_pct, truncate, AppState, ConnectionStatus, WorkerRow};
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table, TableState},
    Frame, Terminal,
};

const REFRESH_INTERVAL: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> io::Result<()> {
    let base_url = std::env::var("API_URL").unwrap_or_else(|_| "http://localhost:8080".to_string());

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .map_err(io::Error::other)?;

    let mut app = AppState::new(base_url);

    // Initial fetch before rendering
    app.refresh(&client).await;

    // Terminal setup
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut worker_table_state = TableState::default();
    worker_table_state.select(None);

    let result = run_loop(&mut terminal, &mut app, &client, &mut worker_table_state).await;

    // Restore terminal regardless of result
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    result
}

// ---------------------------------------------------------------------------
// Main event loop
// ---------------------------------------------------------------------------

async fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut AppState,
    client: &reqwest::Client,
    worker_state: &mut TableState,
) -> io::Result<()> {
    let mut last_tick = std::time::Instant::now();

    loop {
        terminal.draw(|f| render(f, app, worker_state))?;

        let timeout = REFRESH_INTERVAL
            .checked_sub(last_tick.elapsed())
            .unwrap_or(Duration::ZERO);

        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Char('Q') => return Ok(()),
                        KeyCode::Char('r') | KeyCode::Char('R') => {
                            app.refresh(client).await;
                            last_tick = std::time::Instant::now();
                        }
                        KeyCode::Down | KeyCode::Char('j') => {
                            let max = app.workers.len().saturating_sub(1);
                            let next = worker_state.selected().map_or(0, |i| (i + 1).min(max));
                            worker_state.select(Some(next));
                        }
                        KeyCode::Up | KeyCode::Char('k') => {
                            let prev = worker_state
                                .selected()
                                .map_or(0, |i| i.saturating_sub(1));
                            worker_state.select(Some(prev));
                        }
                        _ => {}
                    }
                }
            }
        }

        if last_tick.elapsed() >= REFRESH_INTERVAL {
            app.refresh(client).await;
            last_tick = std::time::Instant::now();
        }
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

fn render(f: &mut Frame, app: &AppState, worker_state: &mut TableState) {
    let area = f.area();

    // Outer vertical split: header | workers | detail | footer
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // header
            Constraint::Min(0),    // workers
            Constraint::Length(5), // selected worker
            Constraint::Length(1), // footer
        ])
        .split(area);

    render_header(f, app, chunks[0]);
    render_workers_table(f, app, worker_state, chunks[1]);
    let selected = worker_state.selected().and_then(|i| app.workers.get(i));
    render_worker_detail(f, selected, chunks[2]);
    render_footer(f, app, chunks[3]);
}

fn render_header(f: &mut Frame, app: &AppState, area: Rect) {
    let (status_text, status_color) = match &app.status {
        ConnectionStatus::Connected if app.health.store_ok == Some(false) => {
            ("● store down".to_string(), Color::Red)
        }
        ConnectionStatus::Connected => ("● connected".to_string(), Color::Green),
        ConnectionStatus::Connecting => ("◌ connecting".to_string(), Color::Yellow),
        ConnectionStatus::Error(e) => (format!("✗ {}", truncate(e, 40)), Color::Red),
    };

    let latency_str = format!(
        "p50 {} / p95 {} / p99 {}",
        format_ms(app.latency.p50_ms),
        format_ms(app.latency.p95_ms),
        format_ms(app.latency.p99_ms)
    );

    let title_spans = vec![
        Span::styled(
            " Fleet Stats  ",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled(status_text, Style::default().fg(status_color)),
        Span::raw("  │  "),
        Span::styled(
            format!("{} fleet", format_hashrate(app.fleet_total())),
            Style::default().fg(Color::White),
        ),
        Span::raw("  │  "),
        Span::styled(
            format!("{} workers", app.workers.len()),
            Style::default().fg(Color::White),
        ),
        Span::raw("  │  "),
        Span::styled(
            format!("{} solutions (window)", app.solutions_short()),
            Style::default().fg(Color::White),
        ),
        Span::raw("  │  "),
        Span::styled(
            format!(
                "ingested {} stats / {} calls",
                format_opt(app.health.samples_ingested),
                format_opt(app.health.api_calls_ingested)
            ),
            Style::default().fg(Color::DarkGray),
        ),
        Span::raw("  │  "),
        Span::styled(latency_str, Style::default().fg(Color::DarkGray)),
    ];

    let paragraph = Paragraph::new(Line::from(title_spans)).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::DarkGray)),
    );

    f.render_widget(paragraph, area);
}

fn render_workers_table(f: &mut Frame, app: &AppState, state: &mut TableState, area: Rect) {
    let header_cells = ["#", "Container", "Avg (window)", "Share", "Daily avg", "Sol W/D", "Challenge", "Day"]
        .iter()
        .map(|h| Cell::from(*h).style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)));
    let header = Row::new(header_cells).height(1);

    let rows: Vec<Row> = app
        .workers
        .iter()
        .enumerate()
        .map(|(i, w)| {
            let share_color = w.global_share_pct.map_or(Color::DarkGray, |s| {
                if s >= 25.0 {
                    Color::Green
                } else if s >= 5.0 {
                    Color::Yellow
                } else {
                    Color::Red
                }
            });

            Row::new(vec![
                Cell::from(format!("{}", i + 1)).style(Style::default().fg(Color::DarkGray)),
                Cell::from(truncate(&w.container_id, 28)),
                Cell::from(format_hashrate(w.avg_hashrate_short)).style(Style::default().fg(Color::Cyan)),
                Cell::from(format_pct(w.global_share_pct)).style(Style::default().fg(share_color)),
                Cell::from(w.daily_avg_hashrate.map_or("—".to_string(), format_hashrate)),
                Cell::from(format!("{}/{}", w.solutions_submitted_short, w.solutions_submitted_daily)),
                Cell::from(w.challenge_id.as_deref().map_or("—".to_string(), |c| truncate(c, 12))),
                Cell::from(format_opt(w.challenge_day)).style(Style::default().fg(Color::DarkGray)),
            ])
        })
        .collect();

    let table = Table::new(
        rows,
        [
            Constraint::Length(3),
            Constraint::Min(12),
            Constraint::Length(13),
            Constraint::Length(8),
            Constraint::Length(12),
            Constraint::Length(8),
            Constraint::Length(12),
            Constraint::Length(4),
        ],
    )
    .header(header)
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::DarkGray))
            .title(Span::styled(
                " WORKERS ",
                Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
            )),
    )
    .row_highlight_style(
        Style::default()
            .bg(Color::DarkGray)
            .add_modifier(Modifier::BOLD),
    );

    f.render_stateful_widget(table, area, state);
}

fn render_worker_detail(f: &mut Frame, worker: Option<&WorkerRow>, area: Rect) {
    let lines = match worker {
        Some(w) => vec![
            Line::from(vec![
                Span::styled(w.container_id.clone(), Style::default().fg(Color::Cyan)),
                Span::raw(format!(
                    "  │  last sample {}  │  {} samples in window, {} today  │  ~{} hashes in window",
                    format_clock(w.last_sample_at.as_deref()),
                    format_opt(w.sample_count_short),
                    format_opt(w.daily_sample_count),
                    w.estimated_hashes_short,
                )),
            ]),
            Line::from(format!(
                "challenge {}  │  difficulty {}  │  day {}  │  issued {}",
                format_opt(w.challenge_id.as_deref()),
                format_opt(w.difficulty.as_deref()),
                format_opt(w.challenge_day),
                format_clock(w.issued_at.as_deref()),
            )),
        ],
        None => vec![Line::from(Span::styled(
            "select a worker with ↑↓ / j k",
            Style::default().fg(Color::DarkGray),
        ))],
    };

    let paragraph = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::DarkGray))
            .title(Span::styled(
                " DETAIL ",
                Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
            )),
    );
    f.render_widget(paragraph, area);
}

fn render_footer(f: &mut Frame, app: &AppState, area: Rect) {
    let line = Line::from(vec![
        Span::styled(" [q] ", Style::default().fg(Color::Yellow)),
        Span::raw("quit  "),
        Span::styled("[r] ", Style::default().fg(Color::Yellow)),
        Span::raw("refresh  "),
        Span::styled("[↑↓ / j k] ", Style::default().fg(Color::Yellow)),
        Span::raw("select worker  "),
        Span::styled(
            format!(
                "auto-refresh: {}s  (updated {}s ago)",
                REFRESH_INTERVAL.as_secs(),
                app.last_refresh.elapsed().as_secs()
            ),
            Style::default().fg(Color::DarkGray),
        ),
    ]);
    let paragraph = Paragraph::new(line).style(Style::default().fg(Color::White));
    f.render_widget(paragraph, area);
}
