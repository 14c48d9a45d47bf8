mod app;
mod config;
mod tui;

use std::io;
use std::net::IpAddr;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{self, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::{cursor, execute};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;

use app::App;
use config::AppConfig;
use duel::{LobbyEvent, LobbyState, PacketLossSimulation};
use tui::TuiState;

#[derive(Parser)]
#[command(name = "duel")]
#[command(about = "Two-player duel over UDP")]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    #[arg(long)]
    headless: bool,

    #[arg(long, help = "Session registry file (default: system temp dir)")]
    registry: Option<PathBuf>,

    #[arg(long, help = "Keep the session registry in memory only")]
    no_registry_file: bool,

    #[arg(long, default_value_t = 3.0, help = "Countdown length in seconds")]
    countdown: f64,

    #[arg(short, long, default_value = "0.0.0.0")]
    bind: IpAddr,

    #[arg(short, long, default_value_t = 0, help = "Relay port (0 picks one)")]
    port: u16,

    #[arg(long, help = "Address to advertise in the session code")]
    advertise: Option<IpAddr>,

    #[arg(long, help = "Enable packet loss simulation on the relay")]
    simulate_packet_loss: bool,

    #[arg(long, default_value_t = 0.0, help = "Packet loss percentage (0-100)")]
    loss_percent: f32,
}

#[derive(Subcommand, Clone)]
enum Command {
    /// Host a session and print its code
    Host,
    /// Join a session by code
    Join { code: String },
}

fn main() -> Result<()> {
    let args = Args::parse();

    if !args.countdown.is_finite() || args.countdown < 0.0 {
        bail!("countdown must be a non-negative number of seconds");
    }

    let registry_path = if args.no_registry_file {
        None
    } else {
        Some(args.registry.clone().unwrap_or_else(duel::SessionRegistry::default_path))
    };

    let config = AppConfig {
        countdown: Duration::from_secs_f64(args.countdown),
        bind: args.bind,
        port: args.port,
        advertise: args.advertise,
        registry_path,
        packet_loss: args
            .simulate_packet_loss
            .then(|| PacketLossSimulation::new(args.loss_percent)),
        ..Default::default()
    };

    let frame_interval = config.frame_interval();
    let mut app = App::new(config);

    if args.headless {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
        let Some(command) = args.command else {
            bail!("--headless needs a `host` or `join <CODE>` command");
        };
        run_headless(&mut app, command, frame_interval)
    } else {
        run_with_tui(&mut app, args.command, frame_interval)?;
        Ok(())
    }
}

fn start(app: &mut App, command: &Command) {
    let lobby = app.lobby_mut();
    match command {
        Command::Host => lobby.host(),
        Command::Join { code } => {
            lobby.begin_join();
            lobby.submit_code(code);
        }
    }
}

fn run_headless(app: &mut App, command: Command, frame_interval: Duration) -> Result<()> {
    start(app, &command);
    if app.lobby().state() == LobbyState::Main || app.lobby().state() == LobbyState::JoinInput {
        bail!(
            "{}",
            app.lobby().error().unwrap_or("could not start the session")
        );
    }

    if let Some(code) = app.lobby().code() {
        log::info!("Session code: {}", code);
    }

    loop {
        let now = Instant::now();
        for event in app.tick(now) {
            match &event {
                LobbyEvent::ConnectionLost { message } => log::error!("{}", message),
                other => log::info!("{:?}", other),
            }
        }
        app.auto_ready(now);

        match app.lobby().state() {
            LobbyState::Main => break,
            // A failed join lands back in code entry with nobody to type.
            LobbyState::JoinInput => {
                log::error!("{}", app.lobby().error().unwrap_or("join failed"));
                break;
            }
            _ => {}
        }

        thread::sleep(frame_interval.saturating_sub(now.elapsed()));
    }

    if let Some(error) = app.lobby().error() {
        log::info!("Session ended: {}", error);
    }
    Ok(())
}

fn run_with_tui(app: &mut App, command: Option<Command>, frame_interval: Duration) -> io::Result<()> {
    terminal::enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, cursor::Hide)?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    let mut tui_state = TuiState::new();

    if let Some(command) = &command {
        start(app, command);
    }

    let mut running = true;
    while running {
        let now = Instant::now();
        for event in app.tick(now) {
            tui_state.log_event(&event);
        }

        if event::poll(frame_interval)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    running = handle_key(app, &mut tui_state, key.code);
                }
            }
        }

        let view = app.view(Instant::now());
        terminal.draw(|frame| {
            tui::render(frame, &tui_state, &view);
        })?;
    }

    app.lobby_mut().quit_to_main();

    terminal::disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, cursor::Show)?;

    Ok(())
}

/// Returns false once the user asks to exit.
fn handle_key(app: &mut App, tui_state: &mut TuiState, code: KeyCode) -> bool {
    let state = app.lobby().state();
    match state {
        LobbyState::Main => match code {
            KeyCode::Char('q') | KeyCode::Esc => return false,
            KeyCode::Char('h') => app.lobby_mut().host(),
            KeyCode::Char('j') => app.lobby_mut().begin_join(),
            _ => {}
        },
        LobbyState::JoinInput => match code {
            KeyCode::Esc => app.lobby_mut().cancel(),
            KeyCode::Enter => {
                let code = tui_state.take_code_input();
                tui_state.log_info(format!("Joining {}", code));
                app.lobby_mut().submit_code(&code);
            }
            KeyCode::Backspace => tui_state.pop_code_char(),
            KeyCode::Char(c) => tui_state.push_code_char(c),
            _ => {}
        },
        LobbyState::HostWaiting => match code {
            KeyCode::Esc => app.lobby_mut().cancel(),
            KeyCode::Char(' ') => app.lobby_mut().start_ready_check(Instant::now()),
            _ => {}
        },
        LobbyState::Connecting | LobbyState::ClientWaiting | LobbyState::Countdown => {
            if code == KeyCode::Esc {
                app.lobby_mut().cancel();
            }
        }
        LobbyState::Playing => match code {
            KeyCode::Char('w') => app.move_local(0.0, -1.0),
            KeyCode::Char('s') => app.move_local(0.0, 1.0),
            KeyCode::Char('a') => app.move_local(-1.0, 0.0),
            KeyCode::Char('d') => app.move_local(1.0, 0.0),
            KeyCode::Up => app.aim_local(0.0, -1.0),
            KeyCode::Down => app.aim_local(0.0, 1.0),
            KeyCode::Left => app.aim_local(-1.0, 0.0),
            KeyCode::Right => app.aim_local(1.0, 0.0),
            KeyCode::Char(' ') => app.shoot_local(),
            KeyCode::Char('p') => app.toggle_pause(),
            KeyCode::Char('r') => app.restart(Instant::now()),
            KeyCode::Char('l') => app.lobby_mut().return_to_lobby(),
            KeyCode::Char('m') | KeyCode::Esc => app.lobby_mut().quit_to_main(),
            _ => {}
        },
    }
    true
}
