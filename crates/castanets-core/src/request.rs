//! Launch request parsing and sanitizing.
//!
//! The payload of a `service-request` is untrusted. Arguments pass through
//! verbatim with one exception: any argument starting with
//! [`CASTANETS_SWITCH`] is replaced by a switch whose value is the
//! requesting connection's own address, and only the first such argument
//! survives.

/// Option enabling distributed rendering in the launched worker.
pub const CASTANETS_SWITCH: &str = "--enable-castanets";

/// Argument list used when a request carries no arguments.
pub const DEFAULT_ARGV: [&str; 2] = ["_", "--type=renderer"];

/// Longest accepted remote address (textual IPv6 with embedded IPv4).
pub const MAX_REMOTE_ADDRESS_LEN: usize = 45;

const ARG_SEPARATOR: char = '&';

/// A parsed launch request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    tokens: Vec<String>,
    argv: Vec<String>,
}

impl LaunchRequest {
    /// Arguments as the peer sent them.
    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    /// Sanitized arguments for the launcher.
    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    pub fn into_argv(self) -> Vec<String> {
        self.argv
    }
}

/// Build the sanitized argument list for a request from `remote_address`.
pub fn parse(remote_address: &str, payload: &str) -> Result<LaunchRequest, RequestError> {
    let tokens: Vec<String> = if payload.is_empty() {
        Vec::new()
    } else {
        payload.split(ARG_SEPARATOR).map(str::to_string).collect()
    };

    let mut argv = Vec::with_capacity(tokens.len());
    let mut castanets_emitted = false;
    for token in &tokens {
        if token.starts_with(CASTANETS_SWITCH) {
            if !castanets_emitted {
                argv.push(castanets_switch(remote_address)?);
                castanets_emitted = true;
            }
        } else {
            argv.push(token.clone());
        }
    }

    if argv.is_empty() {
        argv = DEFAULT_ARGV.iter().map(|arg| arg.to_string()).collect();
    }

    Ok(LaunchRequest { tokens, argv })
}

/// `--enable-castanets=<remote_address>`, bounded by [`MAX_REMOTE_ADDRESS_LEN`].
pub fn castanets_switch(remote_address: &str) -> Result<String, RequestError> {
    if remote_address.len() > MAX_REMOTE_ADDRESS_LEN {
        return Err(RequestError::AddressTooLong {
            len: remote_address.len(),
            max: MAX_REMOTE_ADDRESS_LEN,
        });
    }
    Ok(format!("{CASTANETS_SWITCH}={remote_address}"))
}

/// Error building a launch request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    #[error("remote address is {len} bytes, longer than the {max} byte limit")]
    AddressTooLong { len: usize, max: usize },
}
