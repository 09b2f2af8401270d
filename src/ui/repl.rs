use std::path::PathBuf;

use anyhow::{Context, Result};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::models::{ConversationId, ProjectId};
use crate::session::{SessionController, SessionMsg};
use crate::ui::render::{self, TranscriptRenderer};

const HELP: &str = "\
Commands:
  /projects              list projects and conversations
  /new <name>            create a project and switch to it
  /use <project-id>      switch project (starts a new chat)
  /chat                  start a new chat in the current project
  /open <chat-id>        open a conversation
  /note [text]           show the note, or replace it with text
  /save                  save the note now
  /rm-project <id>       delete a project (asks first)
  /rm-chat <id>          delete a conversation (asks first)
  /yes, /no              answer a delete confirmation
  /export [file]         print or write the chat as Markdown
  /help                  this text
  /quit                  save pending notes and exit
Anything else is sent as a chat message.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Projects,
    NewProject(String),
    UseProject(ProjectId),
    NewChat,
    Open(ConversationId),
    ShowNote,
    EditNote(String),
    SaveNote,
    RemoveProject(ProjectId),
    RemoveChat(ConversationId),
    Confirm,
    Cancel,
    Export(Option<PathBuf>),
    Help,
    Quit,
    Say(String),
    Nothing,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Unknown command: /{0} (try /help)")]
    UnknownCommand(String),
    #[error("/{0} needs an argument")]
    MissingArgument(&'static str),
    #[error("Not a valid id: {0}")]
    InvalidId(String),
}

pub fn parse(line: &str) -> Result<ReplCommand, ParseError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(ReplCommand::Nothing);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(ReplCommand::Say(line.to_string()));
    };

    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };

    let command = match name {
        "projects" | "ls" => ReplCommand::Projects,
        "new" => ReplCommand::NewProject(required("new", arg)?.to_string()),
        "use" => ReplCommand::UseProject(id("use", arg)?),
        "chat" => ReplCommand::NewChat,
        "open" => ReplCommand::Open(id("open", arg)?),
        "note" if arg.is_empty() => ReplCommand::ShowNote,
        "note" => ReplCommand::EditNote(arg.to_string()),
        "save" => ReplCommand::SaveNote,
        "rm-project" => ReplCommand::RemoveProject(id("rm-project", arg)?),
        "rm-chat" => ReplCommand::RemoveChat(id("rm-chat", arg)?),
        "yes" | "y" => ReplCommand::Confirm,
        "no" | "n" => ReplCommand::Cancel,
        "export" => ReplCommand::Export((!arg.is_empty()).then(|| PathBuf::from(arg))),
        "help" | "?" => ReplCommand::Help,
        "quit" | "exit" | "q" => ReplCommand::Quit,
        other => return Err(ParseError::UnknownCommand(other.to_string())),
    };
    Ok(command)
}

fn required<'a>(command: &'static str, arg: &'a str) -> Result<&'a str, ParseError> {
    if arg.is_empty() {
        Err(ParseError::MissingArgument(command))
    } else {
        Ok(arg)
    }
}

fn id<T: std::str::FromStr>(command: &'static str, arg: &str) -> Result<T, ParseError> {
    required(command, arg)?
        .parse()
        .map_err(|_| ParseError::InvalidId(arg.to_string()))
}

/// Run the interactive loop until `/quit` or end of input.
pub async fn run(mut controller: SessionController) -> Result<()> {
    let mut input = BufReader::new(tokio::io::stdin()).lines();
    let mut out = tokio::io::stdout();
    let mut renderer = TranscriptRenderer::new();
    let mut busy = controller.busy_updates();

    write_lines(&mut out, HELP.lines()).await?;
    let _ = controller.update(SessionMsg::Init);

    loop {
        tokio::select! {
            line = input.next_line() => {
                let Some(line) = line.context("Failed to read input")? else {
                    break;
                };
                match parse(&line) {
                    Ok(ReplCommand::Quit) => break,
                    Ok(command) => {
                        let lines = execute(&mut controller, command).await?;
                        write_lines(&mut out, lines.iter().map(String::as_str)).await?;
                    }
                    Err(e) => write_lines(&mut out, [e.to_string().as_str()]).await?,
                }
            }
            Some(cmd) = controller.next_cmd() => controller.update_cmd(cmd),
            Ok(()) = busy.changed() => {
                let waiting = *busy.borrow_and_update();
                write_lines(&mut out, [render::format_busy(waiting)]).await?;
            }
        }
        present(&mut out, &mut controller, &mut renderer).await?;
    }

    controller.shutdown().await;
    present(&mut out, &mut controller, &mut renderer).await?;
    Ok(())
}

/// Apply a parsed command. Returns lines to print right away.
async fn execute(controller: &mut SessionController, command: ReplCommand) -> Result<Vec<String>> {
    let msg = match command {
        ReplCommand::Projects => {
            return Ok(render::format_history(
                &controller.project_rows(),
                &controller.conversation_rows(),
            ));
        }
        ReplCommand::ShowNote => {
            return Ok(render::format_note(
                controller.note_text(),
                controller.note_status(),
            ));
        }
        ReplCommand::Export(path) => return export(controller, path).await,
        ReplCommand::Help => return Ok(HELP.lines().map(String::from).collect()),
        ReplCommand::Nothing | ReplCommand::Quit => return Ok(Vec::new()),
        ReplCommand::NewProject(name) => SessionMsg::CreateProject(name),
        ReplCommand::UseProject(id) => SessionMsg::SelectProject(id),
        ReplCommand::NewChat => SessionMsg::NewChat,
        ReplCommand::Open(id) => SessionMsg::SelectConversation(id),
        ReplCommand::EditNote(text) => SessionMsg::NoteEdited(text),
        ReplCommand::SaveNote => SessionMsg::SaveNotes,
        ReplCommand::RemoveProject(id) => SessionMsg::RequestDeleteProject(id),
        ReplCommand::RemoveChat(id) => SessionMsg::RequestDeleteConversation(id),
        ReplCommand::Confirm => SessionMsg::ConfirmDelete,
        ReplCommand::Cancel => SessionMsg::CancelDelete,
        ReplCommand::Say(text) => SessionMsg::SendMessage(text),
    };

    let asks_confirmation = matches!(
        msg,
        SessionMsg::RequestDeleteProject(_) | SessionMsg::RequestDeleteConversation(_)
    );
    // Rejections surface as notices.
    let _ = controller.update(msg);

    let mut lines = Vec::new();
    if asks_confirmation {
        if let Some(confirmation) = controller.confirmation() {
            lines.push(render::format_confirmation(confirmation));
        }
    }
    Ok(lines)
}

async fn export(controller: &mut SessionController, path: Option<PathBuf>) -> Result<Vec<String>> {
    let markdown = match controller.export_markdown() {
        Ok(markdown) => markdown,
        Err(e) => return Ok(vec![e.to_string()]),
    };
    match path {
        None => Ok(markdown.lines().map(String::from).collect()),
        Some(path) => {
            tokio::fs::write(&path, markdown)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            Ok(vec![format!("Exported to {}", path.display())])
        }
    }
}

async fn present<W: AsyncWrite + Unpin>(
    out: &mut W,
    controller: &mut SessionController,
    renderer: &mut TranscriptRenderer,
) -> Result<()> {
    let mut lines = renderer.pending_lines(controller.transcript());
    lines.extend(controller.take_notices().iter().map(render::format_notice));
    write_lines(out, lines.iter().map(String::as_str)).await
}

async fn write_lines<'a, W, I>(out: &mut W, lines: I) -> Result<()>
where
    W: AsyncWrite + Unpin,
    I: IntoIterator<Item = &'a str>,
{
    for line in lines {
        out.write_all(line.as_bytes()).await?;
        out.write_all(b"\n").await?;
    }
    out.flush().await?;
    Ok(())
}
