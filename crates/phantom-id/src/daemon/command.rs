//! Command-line parsing for the daemon's text protocol.
//!
//! One command per line, words separated by whitespace. `msg` and
//! `broadcast` take the rest of the line as the message body, optionally
//! wrapped in `<...>`.

use std::str::FromStr;

use crate::error::{PhantomError, Result};
use crate::identity::NodeId;
use crate::tree::TraversalOrder;

pub const USAGE: &str = "Commands:
  create [parent_id]             create an account (under the root by default)
  delete <id>                    delete an account
  find <id>                      describe an account
  list bfs|dfs                   list every account
  msg <from_id> <to_id> <text>   send a message
  broadcast <from_id> <text>     send a message to every other account
  status                         tree summary
  save                           write a snapshot now
  history                        show user history
  help                           this text";

const MSG_FORMAT: &str = "Invalid message format. Use: msg <from_id> <to_id> <message>";
const BROADCAST_FORMAT: &str = "Invalid broadcast format. Use: broadcast <from_id> <message>";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Create { parent: Option<NodeId> },
    Delete(NodeId),
    Find(NodeId),
    List(TraversalOrder),
    Msg {
        from: NodeId,
        to: NodeId,
        message: String,
    },
    Broadcast { from: NodeId, message: String },
    Status,
    Save,
    History,
    Help,
}

impl FromStr for Command {
    type Err = PhantomError;

    fn from_str(line: &str) -> Result<Self> {
        let (word, rest) = next_word(line);
        match word {
            "" => Err(PhantomError::InvalidCommand("empty command".into())),
            "create" => {
                let (parent, rest) = next_word(rest);
                no_more(rest, "create [parent_id]")?;
                let parent = match parent {
                    "" => None,
                    p => Some(NodeId::parse(p)?),
                };
                Ok(Self::Create { parent })
            }
            "delete" => Ok(Self::Delete(single_id(rest, "delete <id>")?)),
            "find" => Ok(Self::Find(single_id(rest, "find <id>")?)),
            "list" => {
                let (order, rest) = next_word(rest);
                no_more(rest, "list bfs|dfs")?;
                match order {
                    "bfs" => Ok(Self::List(TraversalOrder::Bfs)),
                    "dfs" => Ok(Self::List(TraversalOrder::Dfs)),
                    _ => Err(PhantomError::InvalidCommand("usage: list bfs|dfs".into())),
                }
            }
            "msg" => {
                let (from, rest) = next_word(rest);
                let (to, rest) = next_word(rest);
                let message = body(rest);
                if from.is_empty() || to.is_empty() || message.is_empty() {
                    return Err(PhantomError::InvalidCommand(MSG_FORMAT.into()));
                }
                Ok(Self::Msg {
                    from: NodeId::parse(from)?,
                    to: NodeId::parse(to)?,
                    message: message.to_string(),
                })
            }
            "broadcast" => {
                let (from, rest) = next_word(rest);
                let message = body(rest);
                if from.is_empty() || message.is_empty() {
                    return Err(PhantomError::InvalidCommand(BROADCAST_FORMAT.into()));
                }
                Ok(Self::Broadcast {
                    from: NodeId::parse(from)?,
                    message: message.to_string(),
                })
            }
            "status" => Ok(Self::Status),
            "save" => Ok(Self::Save),
            "history" => Ok(Self::History),
            "help" => Ok(Self::Help),
            other => Err(PhantomError::InvalidCommand(format!(
                "unknown command '{other}'"
            ))),
        }
    }
}

/// Split off the first whitespace-delimited word.
fn next_word(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    match s.find(char::is_whitespace) {
        Some(i) => (&s[..i], &s[i..]),
        None => (s, ""),
    }
}

fn no_more(rest: &str, usage: &str) -> Result<()> {
    if rest.trim().is_empty() {
        Ok(())
    } else {
        Err(PhantomError::InvalidCommand(format!("usage: {usage}")))
    }
}

fn single_id(rest: &str, usage: &str) -> Result<NodeId> {
    let (id, rest) = next_word(rest);
    if id.is_empty() {
        return Err(PhantomError::InvalidCommand(format!("usage: {usage}")));
    }
    no_more(rest, usage)?;
    NodeId::parse(id)
}

/// Message body: the trimmed remainder, with one surrounding `<...>` removed.
fn body(rest: &str) -> &str {
    let text = rest.trim();
    text.strip_prefix('<')
        .and_then(|t| t.strip_suffix('>'))
        .map(str::trim)
        .unwrap_or(text)
}
