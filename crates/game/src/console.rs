//! Console commands shared by client and server.
//!
//! A line may hold several commands joined with `;`. Each command is checked
//! against the source that issued it before it runs.

use std::fmt;

use crate::net::MAX_USERNAME_LEN;

/// Who issued a command. Commands sent by the server over CON_VAR run with
/// [`CommandSource::Server`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandSource {
    Client,
    Server,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Connect(String),
    Disconnect,
    Name(String),
    Respawn,
    ResetVelocity,
    NoClip,
    Fly,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConsoleError {
    #[error("empty command")]
    Empty,
    #[error("unknown command \"{0}\"")]
    UnknownCommand(String),
    #[error("\"{command}\" expects {argument}")]
    MissingArgument {
        command: &'static str,
        argument: &'static str,
    },
    #[error("\"{0}\" is not permitted from this source")]
    NotPermitted(&'static str),
    #[error("username is longer than {} characters", MAX_USERNAME_LEN)]
    UsernameTooLong,
}

impl ConsoleCommand {
    /// Parses a single command, without `;` separators.
    pub fn parse(line: &str) -> Result<Self, ConsoleError> {
        let line = line.trim();
        let (name, args) = match line.split_once(char::is_whitespace) {
            Some((name, args)) => (name, args.trim()),
            None => (line, ""),
        };

        match name {
            "" => Err(ConsoleError::Empty),
            "connect" => {
                if args.is_empty() {
                    return Err(ConsoleError::MissingArgument {
                        command: "connect",
                        argument: "an address",
                    });
                }
                Ok(ConsoleCommand::Connect(args.to_string()))
            }
            "disconnect" => Ok(ConsoleCommand::Disconnect),
            "name" => {
                let username = args.trim_matches('"');
                if username.is_empty() {
                    return Err(ConsoleError::MissingArgument {
                        command: "name",
                        argument: "a username",
                    });
                }
                if username.chars().count() > MAX_USERNAME_LEN {
                    return Err(ConsoleError::UsernameTooLong);
                }
                Ok(ConsoleCommand::Name(username.to_string()))
            }
            "respawn" => Ok(ConsoleCommand::Respawn),
            "reset_velocity" => Ok(ConsoleCommand::ResetVelocity),
            "noclip" => Ok(ConsoleCommand::NoClip),
            "fly" => Ok(ConsoleCommand::Fly),
            other => Err(ConsoleError::UnknownCommand(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ConsoleCommand::Connect(_) => "connect",
            ConsoleCommand::Disconnect => "disconnect",
            ConsoleCommand::Name(_) => "name",
            ConsoleCommand::Respawn => "respawn",
            ConsoleCommand::ResetVelocity => "reset_velocity",
            ConsoleCommand::NoClip => "noclip",
            ConsoleCommand::Fly => "fly",
        }
    }

    /// Commands that act on the player and therefore run on the server.
    pub fn is_forwarded(&self) -> bool {
        matches!(
            self,
            ConsoleCommand::Respawn
                | ConsoleCommand::ResetVelocity
                | ConsoleCommand::NoClip
                | ConsoleCommand::Fly
        )
    }

    /// A server may only point a client at a server on the same machine.
    pub fn check_permission(&self, source: CommandSource) -> Result<(), ConsoleError> {
        match (self, source) {
            (ConsoleCommand::Connect(address), CommandSource::Server)
                if !is_localhost(address) =>
            {
                Err(ConsoleError::NotPermitted(self.name()))
            }
            _ => Ok(()),
        }
    }
}

fn is_localhost(address: &str) -> bool {
    let host = match address.rsplit_once(':') {
        Some((host, port)) if port.parse::<u16>().is_ok() => host,
        _ => address,
    };
    host.eq_ignore_ascii_case("localhost")
}

impl fmt::Display for ConsoleCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsoleCommand::Connect(address) => write!(f, "connect {}", address),
            ConsoleCommand::Name(username) => write!(f, "name {}", username),
            other => f.write_str(other.name()),
        }
    }
}

/// Splits `line` on `;` and parses every non-empty part.
pub fn parse_line(line: &str) -> Vec<Result<ConsoleCommand, ConsoleError>> {
    line.split(';')
        .filter(|part| !part.trim().is_empty())
        .map(ConsoleCommand::parse)
        .collect()
}

/// Joins commands into one line for a single CON_VAR message.
pub fn join_commands<I, S>(commands: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    commands
        .into_iter()
        .map(|c| c.as_ref().trim().to_string())
        .filter(|c| !c.is_empty())
        .collect::<Vec<_>>()
        .join(";")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands() {
        assert_eq!(
            ConsoleCommand::parse("connect 127.0.0.1:27016"),
            Ok(ConsoleCommand::Connect("127.0.0.1:27016".into()))
        );
        assert_eq!(ConsoleCommand::parse("  noclip "), Ok(ConsoleCommand::NoClip));
        assert_eq!(
            ConsoleCommand::parse("name \"greg\""),
            Ok(ConsoleCommand::Name("greg".into()))
        );
        assert_eq!(ConsoleCommand::parse(""), Err(ConsoleError::Empty));
        assert!(matches!(
            ConsoleCommand::parse("connect"),
            Err(ConsoleError::MissingArgument { .. })
        ));
        assert!(matches!(
            ConsoleCommand::parse("sv_cheats 1"),
            Err(ConsoleError::UnknownCommand(_))
        ));
    }

    #[test]
    fn username_length() {
        let long = "x".repeat(MAX_USERNAME_LEN + 1);
        assert_eq!(
            ConsoleCommand::parse(&format!("name {long}")),
            Err(ConsoleError::UsernameTooLong)
        );
        let exact = "x".repeat(MAX_USERNAME_LEN);
        assert!(ConsoleCommand::parse(&format!("name {exact}")).is_ok());
    }

    #[test]
    fn server_connect_is_localhost_only() {
        let local = ConsoleCommand::Connect("localhost".into());
        let local_port = ConsoleCommand::Connect("localhost:27020".into());
        let remote = ConsoleCommand::Connect("10.0.0.1".into());

        assert!(local.check_permission(CommandSource::Server).is_ok());
        assert!(local_port.check_permission(CommandSource::Server).is_ok());
        assert_eq!(
            remote.check_permission(CommandSource::Server),
            Err(ConsoleError::NotPermitted("connect"))
        );
        assert!(remote.check_permission(CommandSource::Client).is_ok());
    }

    #[test]
    fn split_and_join() {
        let parsed = parse_line("respawn; ;fly;bogus");
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[0], Ok(ConsoleCommand::Respawn));
        assert_eq!(parsed[1], Ok(ConsoleCommand::Fly));
        assert!(parsed[2].is_err());

        assert_eq!(join_commands(["respawn", " noclip ", ""]), "respawn;noclip");
        assert!(ConsoleCommand::Fly.is_forwarded());
        assert!(!ConsoleCommand::Disconnect.is_forwarded());
        assert_eq!(ConsoleCommand::Name("greg".into()).to_string(), "name greg");
    }
}
