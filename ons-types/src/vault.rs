//! Vault sync messages exchanged over the peer data channel.
//!
//! Every frame is one flat JSON object with five string fields:
//!
//! ```json
//! {"type":"text","operate":"update","path":"notes","name":"a.md","data":"aGk="}
//! ```
//!
//! `operate` names the operation. `check` carries the decimal timestamp in
//! `data`; `tree` carries the JSON-encoded file list, or nothing when it
//! is a request.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::EnvelopeError;

/// How a file's content travels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    /// Structural entry, never carries content
    Directory,
    /// Sent whole as one base64 payload
    Text,
    /// Sent as `"<index>:<total>:<base64>"` chunks
    Binary,
}

impl ContentKind {
    /// Wire name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Directory => "directory",
            ContentKind::Text => "text",
            ContentKind::Binary => "binary",
        }
    }

    /// Parse a wire `type`. Anything unrecognized travels as text.
    pub fn parse(s: &str) -> Self {
        match s {
            "directory" => ContentKind::Directory,
            "binary" => ContentKind::Binary,
            _ => ContentKind::Text,
        }
    }
}

/// One entry of a scanned vault tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Path relative to the vault root, `/`-separated
    pub path: String,
    /// Leaf name; empty for directories
    #[serde(default)]
    pub name: String,
    /// Size in bytes
    #[serde(default)]
    pub size: u64,
    /// Modify time, UNIX seconds
    #[serde(default)]
    pub mtime: u64,
    /// Create time, UNIX seconds
    #[serde(default)]
    pub ctime: u64,
}

impl FileEntry {
    /// Whether this entry is a directory.
    pub fn is_dir(&self) -> bool {
        self.name.is_empty()
    }

    /// Parent directory of the entry's path (`""` at the root).
    pub fn parent(&self) -> &str {
        match self.path.rfind('/') {
            Some(idx) => &self.path[..idx],
            None => "",
        }
    }
}

/// Payload of `create`, `update` and `delete`.
///
/// For files `path` is the parent directory and `name` the leaf; for
/// directories `path` is the directory itself and `name` is empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOp {
    /// How the content is encoded, sent as `type`
    pub kind: ContentKind,
    /// Parent directory (files) or the directory itself
    pub path: String,
    /// Leaf name, empty for directories
    pub name: String,
    /// Base64 content, a chunk, or empty
    pub data: String,
}

impl FileOp {
    /// Operation addressing `entry`, with no content attached.
    pub fn for_entry(entry: &FileEntry, kind: ContentKind) -> Self {
        if entry.is_dir() {
            Self {
                kind: ContentKind::Directory,
                path: entry.path.clone(),
                name: String::new(),
                data: String::new(),
            }
        } else {
            Self {
                kind,
                path: entry.parent().to_string(),
                name: entry.name.clone(),
                data: String::new(),
            }
        }
    }

    /// Relative target path: `path/name`, or `path` for directories.
    pub fn target(&self) -> String {
        let parent = self.path.trim_matches('/');
        let parent = if parent == "." { "" } else { parent };
        match (parent.is_empty(), self.name.is_empty()) {
            (true, _) => self.name.clone(),
            (false, true) => parent.to_string(),
            (false, false) => format!("{parent}/{}", self.name),
        }
    }
}

/// Payload of `rename`: move `old_path` to `path/name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenameOp {
    /// Destination directory
    pub path: String,
    /// New leaf name
    pub name: String,
    /// Old relative path, carried in `data`
    pub old_path: String,
}

/// A vault sync protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VaultMessage {
    /// Announce the sender's last-sync timestamp
    Check {
        /// UNIX seconds
        timestamp: u64,
    },
    /// A tree listing, or a request for one when `files` is `None`
    Tree {
        /// Scanned entries
        files: Option<Vec<FileEntry>>,
    },
    /// Create a file or directory
    Create(FileOp),
    /// Write (part of) a file's content
    Update(FileOp),
    /// Remove a file or directory
    Delete(FileOp),
    /// Move an entry
    Rename(RenameOp),
}

/// The flat frame as it appears on the wire.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Frame {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    operate: String,
    #[serde(default)]
    path: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    data: Value,
}

impl Frame {
    fn operation(operate: &str) -> Self {
        Self {
            operate: operate.to_string(),
            data: Value::String(String::new()),
            ..Self::default()
        }
    }

    fn file(operate: &str, op: &FileOp) -> Self {
        Self {
            kind: op.kind.as_str().to_string(),
            operate: operate.to_string(),
            path: op.path.clone(),
            name: op.name.clone(),
            data: Value::String(op.data.clone()),
        }
    }

    fn into_file_op(self) -> FileOp {
        FileOp {
            kind: ContentKind::parse(&self.kind),
            path: self.path,
            name: self.name,
            data: data_string(self.data),
        }
    }
}

fn data_string(data: Value) -> String {
    match data {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

impl VaultMessage {
    /// Operation name carried in `operate`.
    pub fn operation(&self) -> &'static str {
        match self {
            VaultMessage::Check { .. } => "check",
            VaultMessage::Tree { .. } => "tree",
            VaultMessage::Create(_) => "create",
            VaultMessage::Update(_) => "update",
            VaultMessage::Delete(_) => "delete",
            VaultMessage::Rename(_) => "rename",
        }
    }

    fn to_frame(&self) -> Result<Frame, EnvelopeError> {
        let operate = self.operation();
        let frame = match self {
            VaultMessage::Check { timestamp } => Frame {
                data: Value::String(timestamp.to_string()),
                ..Frame::operation(operate)
            },
            VaultMessage::Tree { files: None } => Frame::operation(operate),
            VaultMessage::Tree { files: Some(files) } => Frame {
                data: Value::String(
                    serde_json::to_string(files).map_err(EnvelopeError::Serialization)?,
                ),
                ..Frame::operation(operate)
            },
            VaultMessage::Create(op) | VaultMessage::Update(op) | VaultMessage::Delete(op) => {
                Frame::file(operate, op)
            }
            VaultMessage::Rename(op) => Frame {
                path: op.path.clone(),
                name: op.name.clone(),
                data: Value::String(op.old_path.clone()),
                ..Frame::operation(operate)
            },
        };
        Ok(frame)
    }

    fn from_frame(frame: Frame) -> Result<Self, EnvelopeError> {
        let invalid = |reason: &str| EnvelopeError::InvalidPayload {
            event: frame.operate.clone(),
            reason: reason.to_string(),
        };
        match frame.operate.as_str() {
            "check" => {
                let timestamp = match &frame.data {
                    Value::Number(n) => n.as_u64(),
                    Value::String(s) => s.trim().parse().ok(),
                    _ => None,
                }
                .ok_or_else(|| invalid("expected a UNIX timestamp"))?;
                Ok(VaultMessage::Check { timestamp })
            }
            "tree" => {
                let files = match frame.data {
                    Value::Null => None,
                    Value::String(s) if s.trim().is_empty() => None,
                    Value::String(s) => {
                        Some(serde_json::from_str(&s).map_err(EnvelopeError::Malformed)?)
                    }
                    other => Some(serde_json::from_value(other).map_err(EnvelopeError::Malformed)?),
                };
                Ok(VaultMessage::Tree { files })
            }
            "create" => Ok(VaultMessage::Create(frame.into_file_op())),
            "update" => Ok(VaultMessage::Update(frame.into_file_op())),
            "delete" => Ok(VaultMessage::Delete(frame.into_file_op())),
            "rename" => Ok(VaultMessage::Rename(RenameOp {
                path: frame.path,
                name: frame.name,
                old_path: data_string(frame.data),
            })),
            _ => Err(invalid("unknown vault operation")),
        }
    }

    /// Parse a text frame.
    pub fn decode(text: &str) -> Result<Self, EnvelopeError> {
        let frame: Frame = serde_json::from_str(text).map_err(EnvelopeError::Malformed)?;
        Self::from_frame(frame)
    }

    /// Encode as a text frame.
    pub fn encode(&self) -> Result<String, EnvelopeError> {
        serde_json::to_string(&self.to_frame()?).map_err(EnvelopeError::Serialization)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn file(path: &str) -> FileEntry {
        FileEntry {
            path: path.to_string(),
            name: path.rsplit('/').next().unwrap_or_default().to_string(),
            size: 3,
            mtime: 100,
            ctime: 90,
        }
    }

    fn wire(message: &VaultMessage) -> Value {
        serde_json::from_str(&message.encode().unwrap()).unwrap()
    }

    #[test]
    fn check_wire_shape() {
        assert_eq!(
            wire(&VaultMessage::Check { timestamp: 1_700_000_000 }),
            json!({"type": "", "operate": "check", "path": "", "name": "", "data": "1700000000"})
        );

        let parsed = VaultMessage::decode(r#"{"operate":"check","data":"1700000000"}"#).unwrap();
        assert_eq!(parsed, VaultMessage::Check { timestamp: 1_700_000_000 });
        let numeric = VaultMessage::decode(r#"{"operate":"check","data":1700000000}"#).unwrap();
        assert_eq!(numeric, parsed);
    }

    #[test]
    fn empty_tree_is_a_request() {
        let request = VaultMessage::Tree { files: None };
        assert_eq!(wire(&request)["data"], "");
        assert_eq!(VaultMessage::decode(&request.encode().unwrap()).unwrap(), request);
        assert_eq!(
            VaultMessage::decode(r#"{"operate":"tree"}"#).unwrap(),
            VaultMessage::Tree { files: None }
        );
    }

    #[test]
    fn tree_listing_travels_as_a_json_string() {
        let listing = VaultMessage::Tree {
            files: Some(vec![file("notes/a.md")]),
        };
        let value = wire(&listing);
        assert_eq!(value["operate"], "tree");
        let inner: Value = serde_json::from_str(value["data"].as_str().unwrap()).unwrap();
        assert_eq!(inner[0]["path"], "notes/a.md");
        assert_eq!(VaultMessage::decode(&listing.encode().unwrap()).unwrap(), listing);

        let inline = VaultMessage::decode(r#"{"operate":"tree","data":[]}"#).unwrap();
        assert_eq!(inline, VaultMessage::Tree { files: Some(vec![]) });
    }

    #[test]
    fn file_ops_are_flat() {
        let op = FileOp {
            kind: ContentKind::Text,
            path: "notes".into(),
            name: "a.md".into(),
            data: "aGk=".into(),
        };
        assert_eq!(
            wire(&VaultMessage::Update(op.clone())),
            json!({"type": "text", "operate": "update", "path": "notes", "name": "a.md", "data": "aGk="})
        );

        let created = VaultMessage::decode(
            r#"{"type":"directory","operate":"create","path":"notes/sub","name":"","data":""}"#,
        )
        .unwrap();
        assert!(matches!(created, VaultMessage::Create(op) if op.kind == ContentKind::Directory));
    }

    #[test]
    fn unknown_type_is_text() {
        let msg = VaultMessage::decode(
            r#"{"type":"markdown","operate":"update","path":"","name":"a.md","data":"aGk="}"#,
        )
        .unwrap();
        assert!(matches!(msg, VaultMessage::Update(op) if op.kind == ContentKind::Text));
    }

    #[test]
    fn rename_uses_data_for_old_path() {
        let text = r#"{"type":"text","operate":"rename","path":".","name":"new.txt","data":"old.txt"}"#;
        let msg = VaultMessage::decode(text).unwrap();
        assert_eq!(
            msg,
            VaultMessage::Rename(RenameOp {
                path: ".".into(),
                name: "new.txt".into(),
                old_path: "old.txt".into(),
            })
        );
        assert_eq!(wire(&msg)["data"], "old.txt");
    }

    #[test]
    fn unknown_operation_is_rejected() {
        let err = VaultMessage::decode(r#"{"type":"text","operate":"explode"}"#).unwrap_err();
        assert!(matches!(err, EnvelopeError::InvalidPayload { event, .. } if event == "explode"));
        assert!(VaultMessage::decode(r#"{"operate":"check","data":"soon"}"#).is_err());
        assert!(matches!(
            VaultMessage::decode("not json").unwrap_err(),
            EnvelopeError::Malformed(_)
        ));
    }

    #[test]
    fn op_target_joins_parent_and_leaf() {
        let op = FileOp::for_entry(&file("notes/a.md"), ContentKind::Text);
        assert_eq!(op.path, "notes");
        assert_eq!(op.name, "a.md");
        assert_eq!(op.target(), "notes/a.md");

        let op = FileOp::for_entry(&file("a.md"), ContentKind::Text);
        assert_eq!(op.target(), "a.md");

        let dir = FileEntry {
            path: "notes/sub".into(),
            name: String::new(),
            size: 0,
            mtime: 0,
            ctime: 0,
        };
        let op = FileOp::for_entry(&dir, ContentKind::Binary);
        assert_eq!(op.kind, ContentKind::Directory);
        assert_eq!(op.target(), "notes/sub");

        let op = FileOp {
            kind: ContentKind::Text,
            path: ".".into(),
            name: "x.md".into(),
            data: String::new(),
        };
        assert_eq!(op.target(), "x.md");
    }
}
