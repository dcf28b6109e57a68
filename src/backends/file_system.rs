use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::backends::{parse_args, parse_scenario, unknown_function, Backend};
use crate::functions::{json_schema_for, FunctionDefinition, FunctionParameter};
use crate::RunnerError;

const CLASS_NAME: &str = "GorillaFileSystem";
const DEFAULT_ROOT: &str = "workspace";

static FUNCTIONS: Lazy<Vec<FunctionDefinition>> = Lazy::new(|| {
    vec![
        FunctionDefinition::new("pwd")
            .with_description("Return the current working directory path."),
        FunctionDefinition::new("ls")
            .with_description("List the contents of the current directory.")
            .with_parameter(
                FunctionParameter::new("a", json_schema_for::<bool>())
                    .with_description("Show hidden files and directories.")
                    .with_default(json!(false)),
            ),
        FunctionDefinition::new("cd")
            .with_description("Change the current working directory.")
            .with_parameter(
                FunctionParameter::new("folder", json_schema_for::<String>())
                    .with_description("The folder to change into; '..' moves up one level."),
            ),
        FunctionDefinition::new("mkdir")
            .with_description("Create a directory in the current directory.")
            .with_parameter(FunctionParameter::new("dir_name", json_schema_for::<String>())),
        FunctionDefinition::new("touch")
            .with_description("Create an empty file in the current directory.")
            .with_parameter(FunctionParameter::new("file_name", json_schema_for::<String>())),
        FunctionDefinition::new("echo")
            .with_description("Print content, or write it to a file when file_name is given.")
            .with_parameter(FunctionParameter::new("content", json_schema_for::<String>()))
            .with_parameter(
                FunctionParameter::new("file_name", json_schema_for::<String>()).optional(),
            ),
        FunctionDefinition::new("cat")
            .with_description("Display the contents of a file.")
            .with_parameter(FunctionParameter::new("file_name", json_schema_for::<String>())),
        FunctionDefinition::new("rm")
            .with_description("Remove a file or directory from the current directory.")
            .with_parameter(FunctionParameter::new("file_name", json_schema_for::<String>())),
        FunctionDefinition::new("wc")
            .with_description("Count lines (l), words (w) or characters (c) in a file.")
            .with_parameter(FunctionParameter::new("file_name", json_schema_for::<String>()))
            .with_parameter(
                FunctionParameter::new("mode", json_schema_for::<String>())
                    .with_default(json!("l")),
            ),
    ]
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Node {
    File {
        #[serde(default)]
        content: String,
    },
    Directory {
        #[serde(default)]
        contents: BTreeMap<String, Node>,
    },
}

impl Node {
    fn kind(&self) -> &'static str {
        match self {
            Node::File { .. } => "file",
            Node::Directory { .. } => "directory",
        }
    }

    fn size(&self) -> usize {
        match self {
            Node::File { content } => content.len(),
            Node::Directory { contents } => contents.len(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSystemScenario {
    #[serde(default)]
    root: BTreeMap<String, Node>,
}

#[derive(Deserialize)]
struct LsArgs {
    #[serde(default)]
    a: bool,
}

#[derive(Deserialize)]
struct CdArgs {
    folder: String,
}

#[derive(Deserialize)]
struct DirArgs {
    dir_name: String,
}

#[derive(Deserialize)]
struct FileArgs {
    file_name: String,
}

#[derive(Deserialize)]
struct EchoArgs {
    content: String,
    #[serde(default)]
    file_name: Option<String>,
}

#[derive(Deserialize)]
struct WcArgs {
    file_name: String,
    #[serde(default = "default_wc_mode")]
    mode: String,
}

fn default_wc_mode() -> String {
    "l".to_string()
}

/// In-memory directory tree with a working directory cursor.
#[derive(Debug)]
pub struct GorillaFileSystem {
    root_name: String,
    root: BTreeMap<String, Node>,
    cwd: Vec<String>,
    long_context: bool,
}

impl GorillaFileSystem {
    pub fn new() -> Self {
        Self {
            root_name: DEFAULT_ROOT.to_string(),
            root: BTreeMap::new(),
            cwd: Vec::new(),
            long_context: false,
        }
    }

    fn display_path(&self) -> String {
        let mut path = format!("/{}", self.root_name);
        for segment in &self.cwd {
            path.push('/');
            path.push_str(segment);
        }
        path
    }

    fn current(&self) -> Result<&BTreeMap<String, Node>, RunnerError> {
        walk(&self.root, &self.cwd).ok_or_else(|| self.lost_cwd())
    }

    fn current_mut(&mut self) -> Result<&mut BTreeMap<String, Node>, RunnerError> {
        let error = self.lost_cwd();
        walk_mut(&mut self.root, &self.cwd).ok_or(error)
    }

    fn lost_cwd(&self) -> RunnerError {
        RunnerError::FunctionExecution {
            function: CLASS_NAME.to_string(),
            message: format!("working directory {} no longer exists", self.display_path()),
        }
    }

    fn resolve(&self, path: &str) -> Vec<String> {
        let absolute = path.starts_with('/');
        let mut segments = if absolute { Vec::new() } else { self.cwd.clone() };
        let mut parts = path.split('/').filter(|part| !part.is_empty()).peekable();
        if absolute && parts.peek() == Some(&self.root_name.as_str()) {
            parts.next();
        }
        for part in parts {
            match part {
                "." => {}
                ".." => {
                    segments.pop();
                }
                name => segments.push(name.to_string()),
            }
        }
        segments
    }

    fn ls(&self, args: LsArgs) -> Result<Value, RunnerError> {
        let contents = self.current()?;
        let visible = contents
            .iter()
            .filter(|(name, _)| args.a || !name.starts_with('.'));

        let listing: Vec<Value> = if self.long_context {
            visible
                .map(|(name, node)| json!({"name": name, "type": node.kind(), "size": node.size()}))
                .collect()
        } else {
            visible.map(|(name, _)| json!(name)).collect()
        };
        Ok(json!({ "current_directory_content": listing }))
    }

    fn cd(&mut self, args: CdArgs) -> Result<Value, RunnerError> {
        let target = self.resolve(&args.folder);
        if walk(&self.root, &target).is_none() {
            return Ok(json!({
                "error": format!("cd: {}: No such file or directory", args.folder)
            }));
        }
        self.cwd = target;
        Ok(json!({ "current_working_directory": self.display_path() }))
    }

    fn mkdir(&mut self, args: DirArgs) -> Result<Value, RunnerError> {
        let name = args.dir_name;
        if !is_plain_name(&name) {
            return Ok(json!({
                "error": format!("mkdir: cannot create directory '{name}': Invalid directory name")
            }));
        }
        let contents = self.current_mut()?;
        if contents.contains_key(&name) {
            return Ok(json!({
                "error": format!("mkdir: cannot create directory '{name}': File exists")
            }));
        }
        contents.insert(
            name,
            Node::Directory {
                contents: BTreeMap::new(),
            },
        );
        Ok(Value::Null)
    }

    fn touch(&mut self, args: FileArgs) -> Result<Value, RunnerError> {
        let name = args.file_name;
        if !is_plain_name(&name) {
            return Ok(json!({
                "error": format!("touch: cannot touch '{name}': Invalid file name")
            }));
        }
        let contents = self.current_mut()?;
        if contents.contains_key(&name) {
            return Ok(json!({
                "error": format!("touch: cannot touch '{name}': File exists")
            }));
        }
        contents.insert(
            name,
            Node::File {
                content: String::new(),
            },
        );
        Ok(Value::Null)
    }

    fn echo(&mut self, args: EchoArgs) -> Result<Value, RunnerError> {
        let Some(name) = args.file_name else {
            return Ok(json!({ "terminal_output": args.content }));
        };
        if !is_plain_name(&name) {
            return Ok(json!({
                "error": format!("echo: cannot write to '{name}': Invalid file name")
            }));
        }
        let contents = self.current_mut()?;
        match contents.get_mut(&name) {
            Some(Node::File { content }) => *content = args.content,
            Some(Node::Directory { .. }) => {
                return Ok(json!({
                    "error": format!("echo: cannot write to '{name}': Is a directory")
                }));
            }
            None => {
                contents.insert(
                    name,
                    Node::File {
                        content: args.content,
                    },
                );
            }
        }
        Ok(Value::Null)
    }

    fn cat(&self, args: FileArgs) -> Result<Value, RunnerError> {
        let name = args.file_name;
        match self.current()?.get(&name) {
            Some(Node::File { content }) => Ok(json!({ "file_content": content })),
            Some(Node::Directory { .. }) => Ok(json!({
                "error": format!("cat: {name}: Is a directory")
            })),
            None => Ok(json!({
                "error": format!("cat: {name}: No such file or directory")
            })),
        }
    }

    fn rm(&mut self, args: FileArgs) -> Result<Value, RunnerError> {
        let name = args.file_name;
        if self.current_mut()?.remove(&name).is_some() {
            Ok(json!({ "result": format!("Successfully removed {name}") }))
        } else {
            Ok(json!({
                "error": format!("rm: cannot remove '{name}': No such file or directory")
            }))
        }
    }

    fn wc(&self, args: WcArgs) -> Result<Value, RunnerError> {
        let name = args.file_name;
        let content = match self.current()?.get(&name) {
            Some(Node::File { content }) => content,
            Some(Node::Directory { .. }) => {
                return Ok(json!({ "error": format!("wc: {name}: Is a directory") }));
            }
            None => {
                return Ok(json!({
                    "error": format!("wc: {name}: No such file or directory")
                }));
            }
        };

        let (count, kind) = match args.mode.as_str() {
            "l" => (content.lines().count(), "lines"),
            "w" => (content.split_whitespace().count(), "words"),
            "c" => (content.chars().count(), "characters"),
            other => {
                return Ok(json!({ "error": format!("wc: invalid mode '{other}'") }));
            }
        };
        Ok(json!({ "count": count, "type": kind }))
    }
}

impl Default for GorillaFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for GorillaFileSystem {
    fn class_name(&self) -> &'static str {
        CLASS_NAME
    }

    fn functions(&self) -> &'static [FunctionDefinition] {
        &FUNCTIONS
    }

    fn load_scenario(&mut self, config: &Value, long_context: bool) -> Result<(), RunnerError> {
        let scenario: FileSystemScenario = parse_scenario(CLASS_NAME, config)?;
        self.long_context = long_context;
        self.cwd.clear();

        let Some((root_name, root)) = scenario.root.into_iter().next() else {
            return Ok(());
        };
        match root {
            Node::Directory { contents } => {
                self.root_name = root_name;
                self.root = contents;
                Ok(())
            }
            Node::File { .. } => Err(RunnerError::ScenarioLoad {
                class: CLASS_NAME.to_string(),
                message: format!("root entry '{root_name}' must be a directory"),
            }),
        }
    }

    fn invoke(&mut self, function: &str, arguments: &Value) -> Result<Value, RunnerError> {
        match function {
            "pwd" => Ok(json!({ "current_working_directory": self.display_path() })),
            "ls" => self.ls(parse_args(function, arguments)?),
            "cd" => self.cd(parse_args(function, arguments)?),
            "mkdir" => self.mkdir(parse_args(function, arguments)?),
            "touch" => self.touch(parse_args(function, arguments)?),
            "echo" => self.echo(parse_args(function, arguments)?),
            "cat" => self.cat(parse_args(function, arguments)?),
            "rm" => self.rm(parse_args(function, arguments)?),
            "wc" => self.wc(parse_args(function, arguments)?),
            other => Err(unknown_function(CLASS_NAME, other)),
        }
    }

    fn state(&self) -> Value {
        json!({
            "root": {
                self.root_name.clone(): {
                    "type": "directory",
                    "contents": self.root,
                }
            }
        })
    }
}

fn is_plain_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains('/')
}

fn walk<'a>(root: &'a BTreeMap<String, Node>, path: &[String]) -> Option<&'a BTreeMap<String, Node>> {
    let mut current = root;
    for segment in path {
        current = match current.get(segment) {
            Some(Node::Directory { contents }) => contents,
            _ => return None,
        };
    }
    Some(current)
}

fn walk_mut<'a>(
    root: &'a mut BTreeMap<String, Node>,
    path: &[String],
) -> Option<&'a mut BTreeMap<String, Node>> {
    let mut current = root;
    for segment in path {
        current = match current.get_mut(segment) {
            Some(Node::Directory { contents }) => contents,
            _ => return None,
        };
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> GorillaFileSystem {
        let mut fs = GorillaFileSystem::new();
        fs.load_scenario(
            &json!({
                "root": {
                    "alex": {
                        "type": "directory",
                        "contents": {
                            "notes.txt": {"type": "file", "content": "one two\nthree"},
                            ".secret": {"type": "file", "content": "x"},
                            "docs": {"type": "directory", "contents": {}}
                        }
                    }
                }
            }),
            false,
        )
        .unwrap();
        fs
    }

    #[test]
    fn navigation_and_listing() {
        let mut fs = seeded();

        assert_eq!(
            fs.invoke("ls", &json!({})).unwrap(),
            json!({"current_directory_content": ["docs", "notes.txt"]})
        );
        assert_eq!(
            fs.invoke("ls", &json!({"a": true})).unwrap(),
            json!({"current_directory_content": [".secret", "docs", "notes.txt"]})
        );
        assert_eq!(
            fs.invoke("cd", &json!({"folder": "docs"})).unwrap(),
            json!({"current_working_directory": "/alex/docs"})
        );
        assert_eq!(
            fs.invoke("cd", &json!({"folder": ".."})).unwrap(),
            json!({"current_working_directory": "/alex"})
        );
        assert!(fs.invoke("cd", &json!({"folder": "missing"})).unwrap()["error"].is_string());
        assert_eq!(fs.display_path(), "/alex");
    }

    #[test]
    fn write_then_read_file() {
        let mut fs = seeded();

        assert_eq!(fs.invoke("touch", &json!({"file_name": "todo.txt"})).unwrap(), Value::Null);
        assert!(fs.invoke("touch", &json!({"file_name": "todo.txt"})).unwrap()["error"].is_string());
        fs.invoke("echo", &json!({"content": "buy milk", "file_name": "todo.txt"}))
            .unwrap();
        assert_eq!(
            fs.invoke("cat", &json!({"file_name": "todo.txt"})).unwrap(),
            json!({"file_content": "buy milk"})
        );
        assert_eq!(
            fs.invoke("wc", &json!({"file_name": "notes.txt", "mode": "w"})).unwrap(),
            json!({"count": 3, "type": "words"})
        );
        assert_eq!(
            fs.invoke("rm", &json!({"file_name": "todo.txt"})).unwrap(),
            json!({"result": "Successfully removed todo.txt"})
        );
        assert!(fs.invoke("cat", &json!({"file_name": "todo.txt"})).unwrap()["error"].is_string());
    }

    #[test]
    fn state_ignores_working_directory() {
        let mut moved = seeded();
        moved.invoke("cd", &json!({"folder": "docs"})).unwrap();
        assert_eq!(moved.state(), seeded().state());

        let mut changed = seeded();
        changed.invoke("mkdir", &json!({"dir_name": "tmp"})).unwrap();
        assert_ne!(changed.state(), seeded().state());
    }

    #[test]
    fn long_context_listing_reports_detail() {
        let mut fs = GorillaFileSystem::new();
        fs.load_scenario(
            &json!({"root": {"w": {"type": "directory", "contents": {"a.txt": {"type": "file", "content": "abc"}}}}}),
            true,
        )
        .unwrap();
        assert_eq!(
            fs.invoke("ls", &json!({})).unwrap(),
            json!({"current_directory_content": [{"name": "a.txt", "type": "file", "size": 3}]})
        );
    }

    #[test]
    fn file_root_is_rejected() {
        let mut fs = GorillaFileSystem::new();
        let error = fs
            .load_scenario(&json!({"root": {"w": {"type": "file"}}}), false)
            .unwrap_err();
        assert!(matches!(error, RunnerError::ScenarioLoad { .. }));
    }
}
