use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessEntry {
    pub pid: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executable_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_line: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

impl ProcessEntry {
    /// An entry for a process that is visible by identifier only.
    pub fn bare(pid: u32) -> Self {
        Self {
            pid,
            name: None,
            executable_path: None,
            command_line: None,
            user: None,
        }
    }

    /// Names the executable could be recognised by, most specific first:
    /// the executable path's file name, the first command-line argument's
    /// file name, then the process name.
    pub fn identity_candidates(&self) -> Vec<&str> {
        let mut out = Vec::new();
        if let Some(path) = self.executable_path.as_deref() {
            push_unique(&mut out, file_name(path));
        }
        if let Some(arg0) = self.command_line.as_ref().and_then(|args| args.first()) {
            push_unique(&mut out, file_name(arg0));
        }
        if let Some(name) = self.name.as_deref() {
            push_unique(&mut out, name.trim());
        }
        out
    }

    pub fn display_name(&self) -> String {
        self.identity_candidates()
            .first()
            .map(|s| s.to_string())
            .unwrap_or_else(|| format!("pid {}", self.pid))
    }
}

fn push_unique<'a>(out: &mut Vec<&'a str>, candidate: &'a str) {
    if !candidate.is_empty() && !out.contains(&candidate) {
        out.push(candidate);
    }
}

/// File name of a path written with either separator style.
pub(crate) fn file_name(path: &str) -> &str {
    let path = path.trim().trim_matches('"');
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}
