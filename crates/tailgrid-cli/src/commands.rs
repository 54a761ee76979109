//! Colon commands for the line-mode driver

/// A parsed input line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Start tailing one or more workers
    Tail(Vec<String>),
    /// Stop a running tail
    Stop(String),
    /// Add a pane fed by `:push` instead of a live tail
    Add { name: String, url: Option<String> },
    /// Append a line to a fed pane
    Push { name: String, text: String },
    /// Remove a pane
    Remove(String),
    /// Include a pane in the model's context
    Select(String),
    /// Exclude a pane from the model's context
    Unselect(String),
    /// List panes
    Panes,
    /// Show what would be sent as context
    Context,
    /// Start a fresh conversation
    New,
    /// Cancel the reply being streamed
    Cancel,
    Help,
    Quit,
    /// Plain text: a question for the model
    Ask(String),
    /// Known command with missing arguments
    Usage(&'static str),
    Unknown(String),
}

/// Parse one line of input. Blank lines yield `None`.
pub fn parse(input: &str) -> Option<Command> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    let Some(rest) = input.strip_prefix(':') else {
        return Some(Command::Ask(input.to_string()));
    };

    let mut parts = rest.splitn(2, char::is_whitespace);
    let command = parts.next().unwrap_or("").to_lowercase();
    let args = parts.next().map(str::trim).unwrap_or("");
    let mut words = args.split_whitespace();

    Some(match command.as_str() {
        "tail" | "t" => {
            let names: Vec<String> = words.map(str::to_string).collect();
            if names.is_empty() {
                Command::Usage(":tail <worker> [worker...]")
            } else {
                Command::Tail(names)
            }
        }
        "stop" => match words.next() {
            Some(name) => Command::Stop(name.to_string()),
            None => Command::Usage(":stop <worker>"),
        },
        "add" => match words.next() {
            Some(name) => Command::Add {
                name: name.to_string(),
                url: words.next().map(str::to_string),
            },
            None => Command::Usage(":add <name> [url]"),
        },
        "push" => {
            let mut split = args.splitn(2, char::is_whitespace);
            match (split.next().filter(|n| !n.is_empty()), split.next()) {
                (Some(name), Some(text)) if !text.trim().is_empty() => Command::Push {
                    name: name.to_string(),
                    text: text.trim().to_string(),
                },
                _ => Command::Usage(":push <name> <text>"),
            }
        }
        "rm" | "remove" => match words.next() {
            Some(name) => Command::Remove(name.to_string()),
            None => Command::Usage(":rm <name>"),
        },
        "sel" | "select" => match words.next() {
            Some(name) => Command::Select(name.to_string()),
            None => Command::Usage(":sel <name>"),
        },
        "unsel" | "unselect" => match words.next() {
            Some(name) => Command::Unselect(name.to_string()),
            None => Command::Usage(":unsel <name>"),
        },
        "panes" | "p" => Command::Panes,
        "ctx" | "context" => Command::Context,
        "new" => Command::New,
        "cancel" | "c" => Command::Cancel,
        "help" | "h" | "?" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        _ => Command::Unknown(command),
    })
}

pub fn help_message() -> &'static str {
    r#"Commands:
  :tail, :t <worker...>   Start tailing workers
  :stop <worker>          Stop a tail
  :add <name> [url]       Add a pane fed with :push
  :push <name> <text>     Append a line to a fed pane
  :rm <name>              Remove a pane
  :sel <name>             Include a pane in the model's context
  :unsel <name>           Exclude a pane from the model's context
  :panes, :p              List panes
  :ctx                    Show context sources
  :new                    Start a fresh conversation
  :cancel, :c             Cancel the current reply
  :help, :h, :?           Show this help message
  :quit, :q               Stop all tails and exit

Anything else is sent to the model as a question about the selected panes."#
}
