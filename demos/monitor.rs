//! Terminal remote for one StormAudio processor.
//!
//! ```text
//! cargo run --example monitor -- 192.168.1.50 [port]
//! ```

use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Wrap},
    Frame, Terminal,
};
use std::io;
use std::time::Duration;
use stormaudio::{
    DeviceConfig, Input, PlayerState, PollingMode, Power, Result, StatusReceiver, Step,
    StormAudioClient, DEFAULT_PORT,
};

struct App {
    client: StormAudioClient,
    updates: StatusReceiver,
    status_message: String,
}

impl App {
    fn new(client: StormAudioClient) -> Self {
        let updates = client.subscribe();
        Self {
            client,
            updates,
            status_message: "Connected. +/- volume, m mute, p power, i/I input, r refresh, q quit"
                .to_string(),
        }
    }

    fn report(&mut self, action: &str, result: Result<()>) {
        self.status_message = match result {
            Ok(()) => format!("{} sent", action),
            Err(e) => format!("{} failed: {}", action, e),
        };
    }

    async fn toggle_power(&mut self) {
        let on = self.client.get_status().power != Power::On;
        let result = self.client.set_power(on).await;
        self.report(if on { "Power on" } else { "Power off" }, result);
    }

    async fn step_volume(&mut self, step: Step) {
        let result = self.client.step_volume(step).await;
        self.report("Volume step", result);
    }

    async fn toggle_mute(&mut self) {
        let result = self.client.toggle_mute().await;
        self.report("Mute toggle", result);
    }

    async fn step_input(&mut self, step: Step) {
        let result = self.client.step_input(step).await;
        self.report("Input change", result);
    }

    async fn refresh(&mut self) {
        self.client.refresh_now().await;
        self.status_message = "Status refreshed".to_string();
    }

    fn handle_status_update(&mut self) {
        if let Ok(Some(_)) = self.updates.try_recv() {
            self.status_message = "State updated from processor".to_string();
        }
    }
}

fn ui(f: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([Constraint::Min(0), Constraint::Length(3)])
        .split(f.size());

    render_processor(f, app, chunks[0]);
    render_status(f, app, chunks[1]);
}

fn on_off_style(active: bool) -> Style {
    if active {
        Style::default().fg(Color::Red).add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(Color::Green)
    }
}

fn render_processor(f: &mut Frame, app: &App, area: Rect) {
    let config = app.client.config();
    let status = app.client.get_status();

    let block = Block::default()
        .title(format!(" {} ({}) ", config.name, config.address()))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    let label = |text: &'static str| Span::styled(text, Style::default().fg(Color::Yellow));

    let state_style = match status.player_state() {
        PlayerState::On => Style::default().fg(Color::Green).add_modifier(Modifier::BOLD),
        PlayerState::Booting => Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
        PlayerState::Unavailable => Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        PlayerState::Off | PlayerState::Unknown => Style::default().fg(Color::Gray),
    };

    let volume = match status.volume_db {
        Some(db) => format!("{:.0} dB", db),
        None => "-".to_string(),
    };
    let muted = status.muted.unwrap_or(false);
    let input = status.input.map(|input| input.display_name()).unwrap_or("-");
    let polling = match app.client.polling_mode() {
        PollingMode::Steady => "steady",
        PollingMode::BootTracking => "tracking boot",
        PollingMode::Stopped => "stopped",
    };

    let mut lines = vec![
        Line::from(vec![
            label("State: "),
            Span::styled(format!("{:?}", status.player_state()), state_style),
        ]),
        Line::from(vec![
            label("Processor state: "),
            Span::raw(
                status
                    .processor_state
                    .map(|code| code.to_string())
                    .unwrap_or_else(|| "-".to_string()),
            ),
        ]),
        Line::from(""),
        Line::from(vec![
            label("Volume: "),
            Span::styled(volume, Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)),
        ]),
        Line::from(vec![
            label("Mute: "),
            Span::styled(if muted { "ON" } else { "OFF" }, on_off_style(muted)),
        ]),
        Line::from(vec![label("Input: "), Span::raw(input)]),
        Line::from(""),
        Line::from(vec![label("Polling: "), Span::raw(polling)]),
        Line::from(""),
        Line::from(Span::styled("Inputs:", Style::default().fg(Color::Yellow))),
    ];

    for candidate in Input::ALL {
        let marker = if status.input == Some(candidate) { ">> " } else { "   " };
        lines.push(Line::from(format!("{}{}", marker, candidate.display_name())));
    }

    let text = Paragraph::new(lines).block(block).wrap(Wrap { trim: true });
    f.render_widget(text, area);
}

fn render_status(f: &mut Frame, app: &App, area: Rect) {
    let block = Block::default()
        .title(" Status ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Gray));

    let text = Paragraph::new(app.status_message.clone())
        .block(block)
        .wrap(Wrap { trim: true });

    f.render_widget(text, area);
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let host = args
        .next()
        .ok_or("usage: monitor <host> [port]")?;
    let port = match args.next() {
        Some(port) => port.parse()?,
        None => DEFAULT_PORT,
    };

    let client = StormAudioClient::connect(DeviceConfig::new(host).with_port(port)).await?;
    let mut app = App::new(client);

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = run_app(&mut terminal, &mut app).await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    app.client.shutdown().await;

    if let Err(err) = res {
        println!("Error: {}", err);
    }

    Ok(())
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    loop {
        terminal.draw(|f| ui(f, app))?;

        app.handle_status_update();

        if event::poll(Duration::from_millis(100))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
                        KeyCode::Char('+') | KeyCode::Char('=') => app.step_volume(Step::Up).await,
                        KeyCode::Char('-') | KeyCode::Char('_') => app.step_volume(Step::Down).await,
                        KeyCode::Char('m') => app.toggle_mute().await,
                        KeyCode::Char('p') => app.toggle_power().await,
                        KeyCode::Char('i') => app.step_input(Step::Up).await,
                        KeyCode::Char('I') => app.step_input(Step::Down).await,
                        KeyCode::Char('r') => app.refresh().await,
                        _ => {}
                    }
                }
            }
        }
    }
}
