//! Directory listings.
//!
//! A listing is a snapshot of one directory taken at request time. Nothing is
//! cached; concurrent uploads may or may not show up.

use std::cmp::Ordering;
use std::fmt::Write;
use std::path::Path;

use serde::Serialize;
use tokio::fs;
use tracing::debug;

use crate::error::FileServerError;

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectoryEntry {
    pub name: String,
    pub is_dir: bool,
    /// Size in bytes, files only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl DirectoryEntry {
    pub fn file(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            is_dir: false,
            size: Some(size),
        }
    }

    pub fn dir(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_dir: true,
            size: None,
        }
    }
}

/// Directories first, then files; byte order of the name within each group.
pub fn sort_entries(entries: &mut [DirectoryEntry]) {
    entries.sort_by(|a, b| match (a.is_dir, b.is_dir) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        _ => a.name.cmp(&b.name),
    });
}

/// Read and sort the entries of `dir`.
pub async fn read_entries(dir: &Path) -> Result<Vec<DirectoryEntry>, FileServerError> {
    let mut read_dir = fs::read_dir(dir).await?;
    let mut entries = Vec::new();

    while let Some(entry) = read_dir.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_string();
        // Follows symlinks, so a link to a directory lists as a directory.
        let metadata = match fs::metadata(entry.path()).await {
            Ok(metadata) => metadata,
            Err(err) => {
                debug!("Skipping unreadable entry {:?}: {}", name, err);
                continue;
            }
        };

        if metadata.is_dir() {
            entries.push(DirectoryEntry::dir(name));
        } else {
            entries.push(DirectoryEntry::file(name, metadata.len()));
        }
    }

    sort_entries(&mut entries);
    Ok(entries)
}

/// Human readable size: `"512 B"`, `"1.5 KB"`, `"3.0 MB"`, ...
pub fn format_size(bytes: u64) -> String {
    const UNIT: u64 = 1024;
    const SUFFIXES: [char; 6] = ['K', 'M', 'G', 'T', 'P', 'E'];

    if bytes < UNIT {
        return format!("{} B", bytes);
    }

    let mut div = UNIT;
    let mut exp = 0;
    let mut n = bytes / UNIT;
    while n >= UNIT {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }

    format!("{:.1} {}B", bytes as f64 / div as f64, SUFFIXES[exp])
}

/// Parent of a slash-terminated request path, or `None` at the root.
pub fn parent_path(request_path: &str) -> Option<String> {
    let trimmed = request_path.trim_end_matches('/');
    if trimmed.is_empty() {
        return None;
    }

    let parent = match trimmed.rfind('/') {
        Some(idx) => &trimmed[..=idx],
        None => "/",
    };

    if parent.starts_with('/') {
        Some(parent.to_string())
    } else {
        Some(format!("/{}", parent))
    }
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

/// Percent-encode every segment of a decoded request path.
fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

const STYLE: &str = "body{font-family:-apple-system,BlinkMacSystemFont,\"Segoe UI\",Roboto,Helvetica,Arial,sans-serif;padding:20px;line-height:1.5;color:#333}\
h1{margin-bottom:20px;border-bottom:1px solid #eaeaea;padding-bottom:10px;font-size:24px}\
ul{list-style:none;padding:0}\
li{display:flex;padding:8px 0;border-bottom:1px solid #f5f5f5}\
.icon{width:24px}\
a{flex:1;color:#0366d6;text-decoration:none}\
.size{color:#888;min-width:90px;text-align:right}\
.fab{position:fixed;bottom:30px;right:30px;width:56px;height:56px;border-radius:50%;border:none;background:#0366d6;color:#fff;font-size:28px;cursor:pointer;box-shadow:0 2px 8px rgba(0,0,0,.3)}\
#action-menu{display:none;position:fixed;bottom:100px;right:30px;background:#fff;border-radius:8px;box-shadow:0 4px 12px rgba(0,0,0,.3);padding:10px;min-width:150px}\
#action-menu button{display:block;width:100%;padding:10px;text-align:left;border:none;background:none;cursor:pointer}";

/// Upload and create controls. Every action POSTs to the listed directory.
const ACTIONS: &str = r#"<button class="fab" id="fab" title="Actions">+</button>
<input type="file" id="file-upload" style="display:none" multiple>
<div id="action-menu">
<button data-action="upload">&#x1F4E4; Upload files</button>
<button data-action="createFolder">&#x1F4C1; New folder</button>
<button data-action="createFile">&#x1F4C4; New file</button>
</div>
<script>
(function () {
  const fab = document.getElementById('fab');
  const menu = document.getElementById('action-menu');
  const input = document.getElementById('file-upload');

  function report(response) {
    if (response.ok) {
      location.reload();
      return;
    }
    return response.json()
      .then(body => alert(body.error || response.statusText))
      .catch(() => alert(response.statusText));
  }

  function create(action) {
    const name = (prompt(action === 'createFolder' ? 'Folder name:' : 'File name:') || '').trim();
    if (!name) return;
    if (name.includes('/') || name.includes('\') || name.includes('..')) {
      alert('Invalid name');
      return;
    }
    fetch(window.location.href, {
      method: 'POST',
      headers: { 'Content-Type': 'application/json' },
      body: JSON.stringify({ action: action, name: name })
    }).then(report).catch(err => alert('Error: ' + err));
  }

  function upload(files) {
    if (!files.length) return;
    const form = new FormData();
    for (const file of files) form.append('files', file);
    fab.disabled = true;
    fetch(window.location.href, { method: 'POST', body: form })
      .then(report)
      .catch(err => alert('Error: ' + err))
      .finally(() => { fab.disabled = false; input.value = ''; });
  }

  fab.addEventListener('click', event => {
    event.stopPropagation();
    menu.style.display = menu.style.display === 'block' ? 'none' : 'block';
  });
  document.addEventListener('click', event => {
    if (!menu.contains(event.target)) menu.style.display = 'none';
  });
  menu.addEventListener('click', event => {
    const action = event.target.closest('button')?.dataset.action;
    if (!action) return;
    event.stopPropagation();
    menu.style.display = 'none';
    if (action === 'upload') input.click();
    else create(action);
  });
  input.addEventListener('change', () => upload(input.files));
})();
</script>
"#;

/// Render a listing page for `request_path` (decoded, slash-terminated).
pub fn render_html(request_path: &str, entries: &[DirectoryEntry]) -> String {
    let title = html_escape(request_path);
    let base = encode_path(request_path);
    let mut html = String::with_capacity(1024 + entries.len() * 128);

    let _ = write!(
        html,
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"UTF-8\">\n\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">\n\
         <title>Index of {title}</title>\n<style>{STYLE}</style>\n</head>\n<body>\n\
         <h1>Index of {title}</h1>\n<ul>\n"
    );

    if let Some(parent) = parent_path(request_path) {
        let _ = writeln!(
            html,
            "<li><span class=\"icon\">&#x1F4C1;</span><a href=\"{}\">..</a><span class=\"size\">-</span></li>",
            html_escape(&encode_path(&parent))
        );
    }

    for entry in entries {
        let (icon, suffix, size) = if entry.is_dir {
            ("&#x1F4C1;", "/", "-".to_string())
        } else {
            ("&#x1F4C4;", "", format_size(entry.size.unwrap_or(0)))
        };
        let href = format!("{}{}{}", base, urlencoding::encode(&entry.name), suffix);

        let _ = writeln!(
            html,
            "<li><span class=\"icon\">{icon}</span><a href=\"{}\">{}{suffix}</a><span class=\"size\">{size}</span></li>",
            html_escape(&href),
            html_escape(&entry.name),
        );
    }

    html.push_str("</ul>\n");
    html.push_str(ACTIONS);
    html.push_str("</body>\n</html>\n");
    html
}
