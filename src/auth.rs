use anyhow::{Result, bail};
use std::io::{self, BufRead, IsTerminal};
use zeroize::Zeroizing;

pub const PASSWORD_ENV: &str = "PASSVAULT_PASSWORD";

/// Passphrase for an existing container.
///
/// Looked up in `PASSVAULT_PASSWORD`, then the first line of piped stdin,
/// then a TTY prompt.
pub fn read_password() -> Result<Zeroizing<String>> {
    if let Ok(pw) = std::env::var(PASSWORD_ENV) {
        if !pw.is_empty() {
            return Ok(Zeroizing::new(pw));
        }
    }

    if !io::stdin().is_terminal() {
        let mut line = Zeroizing::new(String::new());
        io::stdin().read_line(&mut line)?;
        trim_newline(&mut line);

        if !line.is_empty() {
            return Ok(line);
        }
    } else {
        let pw = Zeroizing::new(rpassword::prompt_password("Passphrase: ")?);
        if !pw.is_empty() {
            return Ok(pw);
        }
    }

    bail!("no passphrase provided")
}

/// A new passphrase, typed twice.
///
/// From a pipe the next two lines are read, so `passwd` can be scripted
/// with the current passphrase in the environment.
pub fn read_new_password_with_confirmation() -> Result<Zeroizing<String>> {
    let (pw1, pw2) = if io::stdin().is_terminal() {
        (
            Zeroizing::new(rpassword::prompt_password("New passphrase: ")?),
            Zeroizing::new(rpassword::prompt_password("Confirm passphrase: ")?),
        )
    } else {
        let mut handle = io::stdin().lock();
        let mut pw1 = Zeroizing::new(String::new());
        let mut pw2 = Zeroizing::new(String::new());
        handle.read_line(&mut pw1)?;
        handle.read_line(&mut pw2)?;
        trim_newline(&mut pw1);
        trim_newline(&mut pw2);
        (pw1, pw2)
    };

    if pw1.is_empty() {
        bail!("passphrase cannot be empty");
    }
    if pw1 != pw2 {
        bail!("passphrases do not match");
    }

    Ok(pw1)
}

fn trim_newline(s: &mut String) {
    while s.ends_with('\n') || s.ends_with('\r') {
        s.pop();
    }
}
