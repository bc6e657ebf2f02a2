//! Write side of the record store
//!
//! The store is only ever changed by handing it an opaque command (a
//! `bear://x-callback-url/...` URL or a bundle to open). Dispatch is
//! fire-and-forget: nothing comes back, so every check that matters must be
//! made before the command goes out. Failures are logged and never retried.

use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use base64::Engine;
use tracing::{debug, warn};

const CALLBACK_BASE: &str = "bear://x-callback-url";

/// Application asked to open new bundles
const STORE_APP: &str = "Bear";

/// Hands a URL to the system workspace; the URL itself arrives on stdin
///
/// Attachment URLs run to megabytes, far past the argument-list limit, so
/// they never travel as a process argument.
fn url_opener() -> Command {
    let mut command = Command::new("osascript");
    command
        .args(["-l", "JavaScript", "-"])
        .stdin(Stdio::piped())
        .stdout(Stdio::null());
    command
}

/// JXA script opening `url` through `NSWorkspace`
pub fn open_url_script(url: &str) -> String {
    let literal = serde_json::to_string(url).unwrap_or_else(|_| "\"\"".to_string());
    format!(
        "ObjC.import('AppKit');\n$.NSWorkspace.sharedWorkspace.openURL($.NSURL.URLWithString({}));\n",
        literal
    )
}

/// How a write command addresses its note
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoteTarget {
    Id(String),
    Title(String),
}

impl NoteTarget {
    fn query(&self) -> String {
        match self {
            NoteTarget::Id(id) => format!("id={}", id),
            NoteTarget::Title(title) => format!("title={}", encode_path(title)),
        }
    }
}

/// One outbound change to the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCommand {
    /// Create a new note; tags ride inline in the text
    Create { text: String },
    /// Replace a note's entire body
    ReplaceText { target: NoteTarget, text: String },
    /// Append a binary attachment
    AddFile {
        target: NoteTarget,
        filename: String,
        data: Vec<u8>,
    },
    /// Hand a brand-new bundle to the store application
    ImportBundle { path: PathBuf },
}

impl StoreCommand {
    /// Callback URL for this command, `None` for bundle imports
    pub fn to_url(&self) -> Option<String> {
        let url = match self {
            StoreCommand::Create { text } => format!(
                "{}/create?show_window=no&open_note=no&text={}",
                CALLBACK_BASE,
                urlencoding::encode(text)
            ),
            StoreCommand::ReplaceText { target, text } => format!(
                "{}/add-text?show_window=no&open_note=no&mode=replace_all&{}&text={}",
                CALLBACK_BASE,
                target.query(),
                urlencoding::encode(text)
            ),
            StoreCommand::AddFile {
                target,
                filename,
                data,
            } => {
                let encoded = base64::engine::general_purpose::STANDARD.encode(data);
                format!(
                    "{}/add-file?show_window=no&open_note=no&{}&filename={}&mode=append&file={}",
                    CALLBACK_BASE,
                    target.query(),
                    encode_path(filename),
                    urlencoding::encode(&encoded)
                )
            }
            StoreCommand::ImportBundle { .. } => return None,
        };
        Some(url)
    }

    /// Short description for logs (never includes note text)
    pub fn describe(&self) -> String {
        match self {
            StoreCommand::Create { .. } => "create note".to_string(),
            StoreCommand::ReplaceText { target, .. } => format!("replace text of {:?}", target),
            StoreCommand::AddFile {
                target, filename, ..
            } => format!("attach {} to {:?}", filename, target),
            StoreCommand::ImportBundle { path } => format!("import bundle {:?}", path),
        }
    }
}

/// Pauses that give the store time to apply a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettleDelays {
    /// After a text command
    pub after_text: Duration,
    /// After an attachment command
    pub after_file: Duration,
    /// After creating a note, before its identifier can be read back
    pub after_create: Duration,
    /// Before reading the first changed file of an import pass
    pub before_import: Duration,
}

impl Default for SettleDelays {
    fn default() -> Self {
        Self {
            after_text: Duration::from_millis(200),
            after_file: Duration::from_millis(500),
            after_create: Duration::from_secs(1),
            before_import: Duration::from_secs(1),
        }
    }
}

impl SettleDelays {
    /// No pauses at all (tests, dry runs)
    pub fn none() -> Self {
        Self {
            after_text: Duration::ZERO,
            after_file: Duration::ZERO,
            after_create: Duration::ZERO,
            before_import: Duration::ZERO,
        }
    }
}

/// Outbound channel to the store
///
/// `dispatch` returns nothing: delivery is at-most-once and best-effort.
pub trait CommandSink {
    fn dispatch(&self, command: StoreCommand);
}

/// Dispatches commands through the OS URL/document opener
pub struct UrlSchemeDispatcher {
    settle: SettleDelays,
}

impl UrlSchemeDispatcher {
    pub fn new(settle: SettleDelays) -> Self {
        Self { settle }
    }

    fn spawn(&self, command: &mut Command, what: &str) {
        self.spawn_with_input(command, None, what);
    }

    fn spawn_with_input(&self, command: &mut Command, input: Option<String>, what: &str) {
        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!("Could not dispatch {}: {}", what, e);
                return;
            }
        };
        let stdin = child.stdin.take();
        let what = what.to_string();
        // Feed and reap in the background; the result is not observed
        thread::spawn(move || {
            if let (Some(mut stdin), Some(input)) = (stdin, input) {
                if let Err(e) = stdin.write_all(input.as_bytes()) {
                    warn!("Could not dispatch {}: {}", what, e);
                }
            }
            let _ = child.wait();
        });
    }
}

impl CommandSink for UrlSchemeDispatcher {
    fn dispatch(&self, command: StoreCommand) {
        let what = command.describe();
        debug!("Dispatching {}", what);

        let pause = match &command {
            StoreCommand::ImportBundle { path } => {
                self.spawn(Command::new("open").arg("-a").arg(STORE_APP).arg(path), &what);
                self.settle.after_file
            }
            other => {
                let Some(url) = other.to_url() else {
                    warn!("Could not build command URL for {}", what);
                    return;
                };
                self.spawn_with_input(&mut url_opener(), Some(open_url_script(&url)), &what);
                if matches!(other, StoreCommand::AddFile { .. }) {
                    self.settle.after_file
                } else {
                    self.settle.after_text
                }
            }
        };

        if !pause.is_zero() {
            thread::sleep(pause);
        }
    }
}

/// Collects commands instead of sending them (dry runs, tests)
#[derive(Debug, Default)]
pub struct RecordingSink {
    commands: Mutex<Vec<StoreCommand>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything dispatched so far, in order
    pub fn commands(&self) -> Vec<StoreCommand> {
        self.commands
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.commands.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CommandSink for RecordingSink {
    fn dispatch(&self, command: StoreCommand) {
        debug!("Recorded {}", command.describe());
        if let Ok(mut commands) = self.commands.lock() {
            commands.push(command);
        }
    }
}

/// Percent-encode a path-like value, keeping `/` separators
pub fn encode_path(value: &str) -> String {
    value
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Percent-decode a link target, leaving it as-is when it isn't valid UTF-8
pub fn decode_path(value: &str) -> String {
    urlencoding::decode(value)
        .map(|v| v.into_owned())
        .unwrap_or_else(|_| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_url_encodes_text() {
        let cmd = StoreCommand::Create {
            text: "Plan & do\n#work".to_string(),
        };
        let url = cmd.to_url().unwrap();
        assert_eq!(
            url,
            "bear://x-callback-url/create?show_window=no&open_note=no&text=Plan%20%26%20do%0A%23work"
        );
    }

    #[test]
    fn test_replace_by_title_url() {
        let cmd = StoreCommand::ReplaceText {
            target: NoteTarget::Title("My Plan".to_string()),
            text: "x".to_string(),
        };
        let url = cmd.to_url().unwrap();
        assert!(url.contains("mode=replace_all&title=My%20Plan&text=x"));
    }

    #[test]
    fn test_add_file_url_base64_payload() {
        let cmd = StoreCommand::AddFile {
            target: NoteTarget::Id("ABC".to_string()),
            filename: "my pic.png".to_string(),
            data: vec![0xfb, 0xff],
        };
        let url = cmd.to_url().unwrap();
        // "+/8=" percent-encoded with no safe characters
        assert!(url.ends_with("&id=ABC&filename=my%20pic.png&mode=append&file=%2B%2F8%3D"));
    }

    #[test]
    fn test_large_attachment_url_stays_off_the_command_line() {
        let cmd = StoreCommand::AddFile {
            target: NoteTarget::Id("ABC".to_string()),
            filename: "photo.jpg".to_string(),
            data: vec![0xff; 750_000],
        };
        let url = cmd.to_url().unwrap();
        assert!(url.len() > 1_048_576);

        let opener = url_opener();
        let argv: usize = opener.get_args().map(|a| a.len()).sum::<usize>()
            + opener.get_program().len();
        assert!(argv < 1024);

        let script = open_url_script(&url);
        assert!(script.contains(&format!("URLWithString(\"{}\")", url)));
    }

    #[test]
    fn test_url_script_escapes_quotes() {
        let script = open_url_script("bear://x?id=a\"b");
        assert!(script.contains(r#"URLWithString("bear://x?id=a\"b")"#));
    }

    #[test]
    fn test_bundle_import_has_no_url() {
        let cmd = StoreCommand::ImportBundle {
            path: PathBuf::from("/out/New.textbundle"),
        };
        assert!(cmd.to_url().is_none());
        assert!(cmd.describe().contains("New.textbundle"));
    }

    #[test]
    fn test_recording_sink_keeps_order() {
        let sink = RecordingSink::new();
        assert!(sink.is_empty());
        sink.dispatch(StoreCommand::Create {
            text: "a".to_string(),
        });
        sink.dispatch(StoreCommand::Create {
            text: "b".to_string(),
        });
        let commands = sink.commands();
        assert_eq!(commands.len(), 2);
        assert_eq!(
            commands[1],
            StoreCommand::Create {
                text: "b".to_string()
            }
        );
    }

    #[test]
    fn test_encode_and_decode_path() {
        assert_eq!(encode_path("BearImages/ID 1/a b.png"), "BearImages/ID%201/a%20b.png");
        assert_eq!(decode_path("a%20b.png"), "a b.png");
        assert_eq!(decode_path("bad%FF"), "bad%FF");
    }
}
