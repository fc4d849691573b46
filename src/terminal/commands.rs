use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Command {
    Help,
    Parts,
    Part(usize),
    Next,
    Prev,
    Show,
    Answer { question_id: String, option: String },
    Time,
    Finish,
    Logout,
    Quit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub(crate) enum CommandError {
    #[error("type a command, or `help` for the list")]
    Empty,
    #[error("unknown command `{0}`, type `help` for the list")]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
}

const PART_USAGE: &str = "part <number>";
const ANSWER_USAGE: &str = "answer <question> <option>  (or <question>=<option>)";

impl Command {
    pub(crate) fn parse(line: &str) -> Result<Self, CommandError> {
        let line = line.trim();
        if line.is_empty() {
            return Err(CommandError::Empty);
        }

        // `12=b` is a shortcut for `answer 12 b`.
        if let Some((question_id, option)) = line.split_once('=') {
            return answer(question_id, option);
        }

        let mut words = line.split_whitespace();
        let name = words.next().unwrap_or_default().to_ascii_lowercase();
        let args: Vec<&str> = words.collect();

        match (name.as_str(), args.as_slice()) {
            ("help" | "?", []) => Ok(Self::Help),
            ("parts", []) => Ok(Self::Parts),
            ("part", [number]) => match number.parse::<usize>() {
                Ok(number) if number > 0 => Ok(Self::Part(number)),
                _ => Err(CommandError::Usage(PART_USAGE)),
            },
            ("part", _) => Err(CommandError::Usage(PART_USAGE)),
            ("next" | "n", []) => Ok(Self::Next),
            ("prev" | "p", []) => Ok(Self::Prev),
            ("show", []) => Ok(Self::Show),
            ("answer" | "a", [question_id, option]) => answer(question_id, option),
            ("answer" | "a", _) => Err(CommandError::Usage(ANSWER_USAGE)),
            ("time", []) => Ok(Self::Time),
            ("finish", []) => Ok(Self::Finish),
            ("logout", []) => Ok(Self::Logout),
            ("quit" | "exit", []) => Ok(Self::Quit),
            _ => Err(CommandError::Unknown(line.to_string())),
        }
    }
}

fn answer(question_id: &str, option: &str) -> Result<Command, CommandError> {
    let question_id = question_id.trim();
    let option = option.trim();
    if question_id.is_empty() || option.is_empty() {
        return Err(CommandError::Usage(ANSWER_USAGE));
    }
    Ok(Command::Answer { question_id: question_id.to_string(), option: option.to_string() })
}

pub(crate) fn is_yes(line: &str) -> bool {
    matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes" | "o" | "oui")
}
