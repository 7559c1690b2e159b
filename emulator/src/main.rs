mod session;
mod sim;

use std::env;
use std::io::{self, BufRead, Write};
use std::process;
use std::sync::mpsc::{self, TryRecvError};
use std::thread;
use std::time::Duration;

use session::{Session, SessionOptions};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

fn main() -> io::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let options = parse_options().unwrap_or_else(|err| {
        eprintln!("{err}");
        eprintln!(
            "Usage: pms-emulator [--run] [--deep-sleep] [--seed <n>] [--transcript <path>]"
        );
        process::exit(2);
    });

    let mut session = Session::new(&options)?;
    let lines = spawn_stdin_reader();
    let stdout = io::stdout();
    let mut writer = stdout.lock();

    writeln!(
        writer,
        "PMS7003 emulator ready. Type `help` for commands or `exit` to quit."
    )?;
    write!(writer, "> ")?;
    writer.flush()?;

    loop {
        match lines.try_recv() {
            Ok(line) => {
                let trimmed = line.trim();
                if should_terminate(trimmed) {
                    writeln!(writer, "Session closed.")?;
                    break;
                }
                for response in session.handle_command(trimmed)? {
                    writeln!(writer, "{response}")?;
                }
                write!(writer, "> ")?;
                writer.flush()?;
            }
            Err(TryRecvError::Disconnected) => {
                writeln!(writer)?;
                break;
            }
            Err(TryRecvError::Empty) => {}
        }

        for response in session.poll()? {
            writeln!(writer, "{response}")?;
            writer.flush()?;
        }
        thread::sleep(POLL_INTERVAL);
    }

    Ok(())
}

fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

fn should_terminate(input: &str) -> bool {
    input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit")
}

fn parse_options() -> Result<SessionOptions, String> {
    let mut options = SessionOptions::default();
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--run" => options.start_active = true,
            "--deep-sleep" => options.deep_sleep = true,
            "--seed" => {
                let value = args.next().ok_or("Expected value after --seed")?;
                options.seed = value
                    .parse()
                    .map_err(|err| format!("Invalid seed `{value}`: {err}"))?;
            }
            "--transcript" => {
                let value = args.next().ok_or("Expected value after --transcript")?;
                options.transcript = Some(value);
            }
            other => {
                if let Some(value) = other.strip_prefix("--transcript=") {
                    options.transcript = Some(value.to_string());
                } else {
                    return Err(format!("Unknown argument `{other}`"));
                }
            }
        }
    }
    Ok(options)
}
