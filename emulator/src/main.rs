mod session;

use std::env;
use std::io::{self, BufRead, Write};
use std::process::ExitCode;

use session::{Session, SimProfile};

const USAGE: &str = "Usage: tracker-emulator [--profile] <normal|flaky-modem|low-battery>";

fn main() -> ExitCode {
    let profile = match SimProfile::from_args(env::args().skip(1)) {
        Ok(profile) => profile,
        Err(err) => {
            eprintln!("{err}");
            eprintln!("{USAGE}");
            return ExitCode::from(2);
        }
    };

    match repl(profile) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("emulator error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn repl(profile: SimProfile) -> io::Result<()> {
    let mut session = Session::new(profile)?;
    let mut out = io::stdout().lock();

    writeln!(
        out,
        "Tracker emulator up ({} profile). `help` lists commands, `tick` runs one pass, `exit` quits.",
        profile.tag()
    )?;
    write!(out, "> ")?;
    out.flush()?;

    for line in io::stdin().lock().lines() {
        let line = line?;
        let input = line.trim();

        if input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit") {
            writeln!(out, "Session closed.")?;
            return Ok(());
        }
        if !input.is_empty() {
            for response in session.handle_command(input)? {
                writeln!(out, "{response}")?;
            }
        }

        write!(out, "> ")?;
        out.flush()?;
    }

    // stdin reached end of file, e.g. a piped script ran out.
    writeln!(out)?;
    Ok(())
}
