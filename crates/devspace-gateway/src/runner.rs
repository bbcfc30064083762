//! "Run this file" dispatch into the shared terminal.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::GatewayError;
use crate::paths::PathResolver;
use crate::terminal::Terminal;

/// One program invocation. Arguments may contain `{file}`, `{output}`,
/// `{dir}` and `{stem}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandStep {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandStep {
    fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }
}

/// Steps run in order, each only if the previous one succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunTemplate {
    pub steps: Vec<CommandStep>,
}

impl RunTemplate {
    fn single(program: &str, args: &[&str]) -> Self {
        Self {
            steps: vec![CommandStep::new(program, args)],
        }
    }

    fn compile_then_run(compiler: &str) -> Self {
        Self {
            steps: vec![
                CommandStep::new(compiler, &["{file}", "-O2", "-o", "{output}"]),
                CommandStep::new("{output}", &[]),
            ],
        }
    }

    /// Render the template for `file` as a single shell command line.
    pub fn render(&self, file: &Path) -> String {
        let values = Placeholders::for_file(file);
        self.steps
            .iter()
            .map(|step| {
                let argv = std::iter::once(&step.program)
                    .chain(step.args.iter())
                    .map(|arg| values.substitute(arg));
                shell_words::join(argv)
            })
            .collect::<Vec<_>>()
            .join(" && ")
    }
}

/// Built-in templates keyed by lowercase extension.
pub fn default_templates() -> HashMap<String, RunTemplate> {
    let mut templates = HashMap::new();
    templates.insert("py".to_string(), RunTemplate::single("python3", &["{file}"]));
    templates.insert("js".to_string(), RunTemplate::single("node", &["{file}"]));
    templates.insert(
        "ts".to_string(),
        RunTemplate::single("node", &["--loader", "ts-node/esm", "{file}"]),
    );
    templates.insert("c".to_string(), RunTemplate::compile_then_run("gcc"));
    templates.insert("cpp".to_string(), RunTemplate::compile_then_run("g++"));
    templates.insert(
        "java".to_string(),
        RunTemplate {
            steps: vec![
                CommandStep::new("javac", &["{file}"]),
                CommandStep::new("cd", &["{dir}"]),
                CommandStep::new("java", &["{stem}"]),
            ],
        },
    );
    templates.insert("sh".to_string(), RunTemplate::single("bash", &["{file}"]));
    templates
}

struct Placeholders {
    file: String,
    output: String,
    dir: String,
    stem: String,
}

impl Placeholders {
    fn for_file(file: &Path) -> Self {
        let stem = file
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let dir = file.parent().unwrap_or(file);
        Self {
            file: file.to_string_lossy().to_string(),
            output: dir.join(&stem).to_string_lossy().to_string(),
            dir: dir.to_string_lossy().to_string(),
            stem,
        }
    }

    fn substitute(&self, arg: &str) -> String {
        arg.replace("{file}", &self.file)
            .replace("{output}", &self.output)
            .replace("{dir}", &self.dir)
            .replace("{stem}", &self.stem)
    }
}

/// Outcome of a run request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// The command was written to the terminal.
    Accepted { command: String },
    /// No template for the extension; an explanatory echo was written instead.
    NoRunner { extension: String },
}

/// Turns run requests into commands typed into the shared terminal.
pub struct RunDispatcher {
    resolver: PathResolver,
    templates: HashMap<String, RunTemplate>,
    terminal: Arc<dyn Terminal>,
}

impl RunDispatcher {
    pub fn new(
        resolver: PathResolver,
        templates: HashMap<String, RunTemplate>,
        terminal: Arc<dyn Terminal>,
    ) -> Self {
        Self {
            resolver,
            templates,
            terminal,
        }
    }

    /// Resolve `path` and inject the matching command into the terminal.
    ///
    /// Path errors are returned before anything reaches the shell. The file
    /// does not need to exist; the toolchain reports that in the terminal.
    pub async fn dispatch(&self, path: &str) -> Result<Dispatch, GatewayError> {
        let file = self.resolver.resolve(path).await?;
        if self.resolver.is_root(&file) {
            return Err(GatewayError::PathInvalid(
                "cannot run the workspace root".to_string(),
            ));
        }

        let extension = file
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();

        match self.templates.get(&extension) {
            Some(template) => {
                let command = template.render(&file);
                info!("Running {}: {}", path, command);
                self.terminal.write(format!("{command}\r").as_bytes());
                Ok(Dispatch::Accepted { command })
            }
            None => {
                info!("No runner configured for {:?}", path);
                let label = if extension.is_empty() {
                    "files without an extension".to_string()
                } else {
                    format!("*.{extension}")
                };
                let message = shell_words::quote(&format!("No runner configured for {label}"))
                    .into_owned();
                self.terminal.write(format!("echo {message}\r").as_bytes());
                Ok(Dispatch::NoRunner { extension })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terminal::TerminalState;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingTerminal {
        written: Mutex<Vec<String>>,
    }

    impl RecordingTerminal {
        fn written(&self) -> Vec<String> {
            self.written.lock().unwrap().clone()
        }
    }

    impl Terminal for RecordingTerminal {
        fn write(&self, bytes: &[u8]) {
            self.written
                .lock()
                .unwrap()
                .push(String::from_utf8_lossy(bytes).to_string());
        }

        fn state(&self) -> TerminalState {
            TerminalState::Running
        }

        fn shutdown(&self) {}
    }

    fn dispatcher() -> (TempDir, Arc<RecordingTerminal>, RunDispatcher) {
        let temp_dir = TempDir::new().unwrap();
        let resolver = PathResolver::canonical(temp_dir.path()).unwrap();
        let terminal = Arc::new(RecordingTerminal::default());
        let dispatcher = RunDispatcher::new(resolver, default_templates(), terminal.clone());
        (temp_dir, terminal, dispatcher)
    }

    #[tokio::test]
    async fn test_python_uses_resolved_path() {
        let (_tmp, terminal, dispatcher) = dispatcher();
        let expected = dispatcher.resolver.root().join("x.py");

        let outcome = dispatcher.dispatch("/x.py").await.unwrap();

        let command = format!("python3 {}", shell_words::quote(&expected.to_string_lossy()));
        assert_eq!(
            outcome,
            Dispatch::Accepted {
                command: command.clone()
            }
        );
        assert_eq!(terminal.written(), vec![format!("{command}\r")]);
    }

    #[tokio::test]
    async fn test_unknown_extension_echoes() {
        let (_tmp, terminal, dispatcher) = dispatcher();

        let outcome = dispatcher.dispatch("/x.unknown").await.unwrap();

        assert_eq!(
            outcome,
            Dispatch::NoRunner {
                extension: "unknown".to_string()
            }
        );
        assert_eq!(
            terminal.written(),
            vec!["echo 'No runner configured for *.unknown'\r".to_string()]
        );
    }

    #[tokio::test]
    async fn test_escape_never_reaches_shell() {
        let (_tmp, terminal, dispatcher) = dispatcher();

        assert!(matches!(
            dispatcher.dispatch("/../../etc/passwd.py").await,
            Err(GatewayError::PathEscape)
        ));
        assert!(matches!(
            dispatcher.dispatch("").await,
            Err(GatewayError::PathInvalid(_))
        ));
        assert!(terminal.written().is_empty());
    }

    #[test]
    fn test_compiled_languages_chain_steps() {
        let templates = default_templates();
        let file = Path::new("/ws/src/main.c");
        assert_eq!(
            templates["c"].render(file),
            "gcc /ws/src/main.c -O2 -o /ws/src/main && /ws/src/main"
        );

        let file = Path::new("/ws/Hello.java");
        assert_eq!(
            templates["java"].render(file),
            "javac /ws/Hello.java && cd /ws && java Hello"
        );
    }

    #[test]
    fn test_metacharacters_are_quoted() {
        let templates = default_templates();
        let file = Path::new("/ws/my dir/a;rm -rf $HOME.py");
        assert_eq!(
            templates["py"].render(file),
            "python3 '/ws/my dir/a;rm -rf $HOME.py'"
        );
    }
}
