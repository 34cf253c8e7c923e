use rustyline::completion::{Completer, Pair};
use rustyline::history::MemHistory;
use rustyline::{CompletionType, Config, Context, Editor};
use rustyline_derive::{Helper, Highlighter, Hinter, Validator};

const COMMANDS: &[&str] = &["break", "continue", "der", "quit", "read", "remove", "step"];

#[derive(Helper, Highlighter, Hinter, Validator)]
pub struct ShellHelper;

impl Completer for ShellHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        let head = &line[..pos];
        // only the command word is completed
        if head.contains(' ') {
            return Ok((pos, vec![]));
        }
        let candidates = COMMANDS
            .iter()
            .filter(|command| command.starts_with(head))
            .map(|command| Pair {
                display: command.to_string(),
                replacement: command.to_string(),
            })
            .collect();
        Ok((0, candidates))
    }
}

pub fn create_editor() -> rustyline::Result<Editor<ShellHelper, MemHistory>> {
    let config = Config::builder()
        .completion_type(CompletionType::List)
        .build();
    let mut editor = Editor::with_history(config, MemHistory::new())?;
    editor.set_helper(Some(ShellHelper));
    Ok(editor)
}
