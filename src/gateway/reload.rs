//! Live-reload script injection and the `/_nsyte/check-updates` JSON body.

use serde::Serialize;

const POLL_SCRIPT_TEMPLATE: &str = r#"<script>
(function() {
  var path = {path};
  var since = {since};
  setInterval(function() {
    fetch('/_nsyte/check-updates?path=' + encodeURIComponent(path) + '&since=' + since)
      .then(function(r) { return r.json(); })
      .then(function(j) { if (j.hasUpdate) { location.reload(); } })
      .catch(function() {});
  }, 5000);
})();
</script>"#;

fn render_script(path: &str, since_ms: i64) -> String {
    POLL_SCRIPT_TEMPLATE
        .replace("{path}", &serde_json::to_string(path).unwrap_or_else(|_| "\"/\"".to_string()))
        .replace("{since}", &since_ms.to_string())
}

/// Injects the poll script before `</body>`, or before `</html>`, or at the
/// end of the document if neither tag is present. Never injects twice.
pub fn inject_reload_script(html: &str, path: &str, since_ms: i64) -> String {
    if html.contains("_nsyte/check-updates") {
        return html.to_string();
    }

    let script = render_script(path, since_ms);

    if let Some(pos) = html.to_ascii_lowercase().rfind("</body>") {
        let mut out = String::with_capacity(html.len() + script.len());
        out.push_str(&html[..pos]);
        out.push_str(&script);
        out.push_str(&html[pos..]);
        return out;
    }

    if let Some(pos) = html.to_ascii_lowercase().rfind("</html>") {
        let mut out = String::with_capacity(html.len() + script.len());
        out.push_str(&html[..pos]);
        out.push_str(&script);
        out.push_str(&html[pos..]);
        return out;
    }

    format!("{html}{script}")
}

#[derive(Debug, Serialize)]
pub struct CheckUpdatesResponse {
    #[serde(rename = "hasUpdate")]
    pub has_update: bool,
    pub timestamp: i64,
}

pub fn loading_page_html() -> String {
    "<!doctype html><html><head><meta http-equiv=\"refresh\" content=\"2\"></head>\
     <body><p>Loading site…</p></body></html>"
        .to_string()
}

pub fn not_found_html() -> String {
    "<!doctype html><html><body><h1>404 Not Found</h1></body></html>".to_string()
}
