use color_eyre::eyre::{
    Result,
    eyre,
};
use crossterm::{
    event::{
        self,
        Event,
        KeyCode,
        KeyEvent,
        KeyEventKind,
        KeyModifiers,
    },
    terminal::{
        disable_raw_mode,
        enable_raw_mode,
    },
};
use lottery_sync::{
    AccountAddress,
    SyncState,
    reconcile::{
        format_apt,
        format_countdown,
    },
};
use ratatui::{
    prelude::*,
    widgets::*,
};
use std::io::stdout;
use tokio::sync::mpsc;

pub type InputEventReceiver = mpsc::UnboundedReceiver<Event>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UserEvent {
    Quit,
    Refresh,
    Redraw,
}

/// Static facts about what is being watched, shown in the header.
#[derive(Clone, Debug)]
pub struct WatchLabel {
    pub network: String,
    pub creator: AccountAddress,
    pub endpoints: usize,
}

pub struct UiState {
    label: WatchLabel,
    terminal: Option<Terminal<CrosstermBackend<std::io::Stdout>>>,
}

impl UiState {
    pub fn new(label: WatchLabel) -> Self {
        Self {
            label,
            terminal: None,
        }
    }
}

pub fn terminal_enter(state: &mut UiState) -> Result<()> {
    enable_raw_mode()?;
    crossterm::execute!(std::io::stdout(), crossterm::terminal::EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout());
    let terminal = Terminal::new(backend)?;
    state.terminal = Some(terminal);
    Ok(())
}

pub fn terminal_exit() -> Result<()> {
    disable_raw_mode()?;
    crossterm::execute!(std::io::stdout(), crossterm::terminal::LeaveAlternateScreen)?;
    Ok(())
}

/// Reads terminal events on a dedicated thread, since `event::read` blocks.
pub fn spawn_input_thread() -> InputEventReceiver {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        loop {
            match event::read() {
                Ok(ev) => {
                    if tx.send(ev).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    tracing::error!(?err, "terminal input failed");
                    break;
                }
            }
        }
    });
    rx
}

pub async fn next_raw_event(events: &mut InputEventReceiver) -> Result<Event> {
    events
        .recv()
        .await
        .ok_or_else(|| eyre!("terminal input closed"))
}

pub fn interpret_event(event: Event) -> Option<UserEvent> {
    match event {
        Event::Key(KeyEvent {
            code,
            modifiers,
            kind: KeyEventKind::Press,
            ..
        }) => match code {
            KeyCode::Char('c') if modifiers.contains(KeyModifiers::CONTROL) => {
                Some(UserEvent::Quit)
            }
            KeyCode::Char('q') | KeyCode::Esc => Some(UserEvent::Quit),
            KeyCode::Char('r') => Some(UserEvent::Refresh),
            _ => None,
        },
        Event::Resize(..) => Some(UserEvent::Redraw),
        _ => None,
    }
}

pub fn draw(state: &mut UiState, snap: &SyncState) -> Result<()> {
    if let Some(mut term) = state.terminal.take() {
        let label = &state.label;
        term.draw(|f| ui(f, label, snap))?;
        state.terminal = Some(term);
    }
    Ok(())
}

fn ui(f: &mut Frame, label: &WatchLabel, snap: &SyncState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(8),
            Constraint::Length(7),
            Constraint::Length(3),
        ])
        .split(f.area());
    draw_header(f, chunks[0], label);
    draw_game(f, chunks[1], snap);
    draw_sync(f, chunks[2], snap);
    draw_help(f, chunks[3]);
}

fn draw_header(f: &mut Frame, area: Rect, label: &WatchLabel) {
    let header = Paragraph::new(format!(
        "Network: {} | Creator: {} | Endpoints: {}",
        label.network,
        label.creator.short(),
        label.endpoints
    ))
    .block(Block::default().borders(Borders::ALL).title("Lottery"));
    f.render_widget(header, area);
}

fn draw_game(f: &mut Frame, area: Rect, snap: &SyncState) {
    let lines: Vec<Line> = game_lines(snap).into_iter().map(Line::from).collect();
    let status = Paragraph::new(lines)
        .style(phase_style(snap))
        .block(Block::default().borders(Borders::ALL).title("Game"));
    f.render_widget(status, area);
}

fn draw_sync(f: &mut Frame, area: Rect, snap: &SyncState) {
    let lines: Vec<Line> = sync_lines(snap).into_iter().map(Line::from).collect();
    let style = if snap.last_error.is_some() {
        Style::default().fg(Color::Red)
    } else {
        Style::default()
    };
    let sync = Paragraph::new(lines)
        .style(style)
        .wrap(Wrap { trim: true })
        .block(Block::default().borders(Borders::ALL).title("Sync"));
    f.render_widget(sync, area);
}

fn draw_help(f: &mut Frame, area: Rect) {
    let help = Paragraph::new("[r] refresh  [q/Esc] quit")
        .block(Block::default().borders(Borders::ALL).title("Keys"));
    f.render_widget(help, area);
}

fn phase_style(snap: &SyncState) -> Style {
    if snap.is_game_active {
        Style::default().fg(Color::Green)
    } else if snap.winner.is_some() {
        Style::default().fg(Color::Yellow)
    } else {
        Style::default()
    }
}

fn game_lines(snap: &SyncState) -> Vec<String> {
    if !snap.has_synced() {
        return vec!["Waiting for first sync…".to_string()];
    }
    let mut lines = vec![
        format!("Status: {}", snap.phase),
        format!("Time left: {}", format_countdown(snap.time_left)),
        format!("Prize pool: {}", format_apt(snap.prize_pool)),
        format!("Ticket price: {}", format_apt(snap.ticket_price)),
        format!(
            "Last buyer: {}",
            snap.last_buyer
                .map(|buyer| buyer.to_string())
                .unwrap_or_else(|| "none".to_string())
        ),
    ];
    if let Some(winner) = snap.winner {
        lines.push(format!("Winner: {winner}"));
    }
    lines.push(if snap.can_buy_ticket() {
        "Tickets: on sale".to_string()
    } else {
        "Tickets: closed".to_string()
    });
    lines
}

fn sync_lines(snap: &SyncState) -> Vec<String> {
    vec![
        format!(
            "Resolved address: {}",
            snap.resolved_address
                .map(|a| a.to_string())
                .unwrap_or_else(|| "-".to_string())
        ),
        format!(
            "Last sync: {}",
            snap.last_synced_at
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "never".to_string())
        ),
        format!("Retries: {}", snap.retry_count),
        format!("Error: {}", snap.last_error.as_deref().unwrap_or("none")),
    ]
}
