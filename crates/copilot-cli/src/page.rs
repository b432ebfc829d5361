use copilot_contracts::messages::Message;
use copilot_contracts::session::{SessionState, SUMMARY_MAX_CHARS};
use copilot_engine::normalize::SUPPORTED_UPLOAD_EXTENSIONS;
use copilot_engine::{normalize_image, NormalizeOptions};

const PAGE_STYLE: &str = "
    body { font-family: Arial, sans-serif; background: #f6f6f6; margin: 0; color: #222; }
    header { background: #1f3b57; color: white; padding: 12px 20px; }
    header .model { font-size: 12px; opacity: 0.8; }
    .layout { display: flex; gap: 20px; padding: 20px; }
    aside { width: 260px; flex-shrink: 0; }
    main { flex: 1; max-width: 860px; }
    .panel { background: white; border-radius: 10px; padding: 12px 16px; box-shadow: 0 2px 8px rgba(0,0,0,0.08); margin-bottom: 16px; }
    .notice { background: #fdecea; color: #8a1c12; border-left: 4px solid #d93025; }
    .chart img { max-width: 100%; border: 1px solid #ddd; }
    .msg { padding: 10px 12px; border-radius: 8px; margin: 8px 0; line-height: 1.45; }
    .msg.user { background: #e8f0fe; }
    .msg.assistant { background: #f1f3f4; }
    .msg .role { font-size: 11px; text-transform: uppercase; color: #666; margin-bottom: 4px; }
    .summary li { font-size: 13px; margin-bottom: 8px; }
    .suggestions form { display: inline-block; margin: 4px 4px 0 0; }
    .suggestions button { background: white; border: 1px solid #1f3b57; border-radius: 14px; padding: 6px 10px; cursor: pointer; }
    textarea { width: 100%; min-height: 60px; box-sizing: border-box; }
    .typing { font-style: italic; color: #666; }
";

const PAGE_SCRIPT: &str = "
document.querySelectorAll('form[data-pending]').forEach(function (form) {
  form.addEventListener('submit', function () {
    var log = document.getElementById('log');
    if (log) {
      var note = document.createElement('div');
      note.className = 'msg assistant typing';
      note.textContent = form.getAttribute('data-pending');
      log.appendChild(note);
    }
    document.querySelectorAll('button').forEach(function (button) { button.disabled = true; });
  });
});
";

/// What the browser page shows for one session. `preview` is the chart's
/// data URL, encoded once when the upload succeeded.
pub struct PageView<'a> {
    pub state: &'a SessionState,
    pub notice: Option<&'a str>,
    pub preview: Option<&'a str>,
    pub model: &'a str,
}

pub fn render_page(view: &PageView<'_>) -> String {
    let state = view.state;
    let mut body = String::new();

    if let Some(notice) = view.notice {
        body.push_str(&format!(
            "<div class='panel notice' role='alert'>{}</div>",
            escape_html(notice)
        ));
    }

    if !state.initial_analysis_done() {
        let accept = SUPPORTED_UPLOAD_EXTENSIONS
            .iter()
            .map(|ext| format!(".{ext}"))
            .collect::<Vec<_>>()
            .join(",");
        body.push_str(&format!(
            "<div class='panel'><h2>Upload a chart</h2>\
             <form method='post' action='/upload' enctype='multipart/form-data' data-pending='Analyzing the chart...'>\
             <input type='file' name='file' accept='{accept}' required> \
             <button type='submit'>Analyze</button></form></div>"
        ));
    } else {
        if let Some(src) = view.preview {
            body.push_str(&format!(
                "<div class='panel chart'><img src='{}' alt='uploaded chart'></div>",
                escape_html(src)
            ));
        }
        body.push_str("<div class='panel' id='log'>");
        for message in state.messages() {
            body.push_str(&render_message(message));
        }
        body.push_str("</div>");

        if let Some(suggestions) = state.suggestions() {
            body.push_str("<div class='panel suggestions'><h3>Suggested questions</h3>");
            for (idx, question) in suggestions.iter().enumerate() {
                body.push_str(&format!(
                    "<form method='post' action='/suggestions/{choice}' data-pending='Typing...'>\
                     <button type='submit'>{question}</button></form>",
                    choice = idx + 1,
                    question = escape_html(question),
                ));
            }
            body.push_str("</div>");
        }

        body.push_str(
            "<div class='panel'><form method='post' action='/ask' data-pending='Typing...'>\
             <textarea name='question' placeholder='Ask a follow-up question about the chart' required></textarea>\
             <button type='submit'>Ask</button></form></div>",
        );
    }

    body.push_str(
        "<div class='panel'><form method='post' action='/reset'>\
         <button type='submit'>Start over</button></form></div>",
    );

    let summary = render_summary(state);
    format!(
        "<!doctype html>\n<html>\n<head>\n  <meta charset='utf-8'>\n  <title>Chart Co-pilot</title>\n  <style>{PAGE_STYLE}</style>\n</head>\n<body>\n  <header><strong>Chart Co-pilot</strong> <span class='model'>{model}</span></header>\n  <div class='layout'>\n    <aside>{summary}</aside>\n    <main>{body}</main>\n  </div>\n  <script>{PAGE_SCRIPT}</script>\n</body>\n</html>\n",
        model = escape_html(view.model),
    )
}

fn render_summary(state: &SessionState) -> String {
    let lines = state.summary_lines(SUMMARY_MAX_CHARS);
    if lines.is_empty() {
        return "<div class='panel summary'><h3>Conversation summary</h3><p>No conversation yet.</p></div>"
            .to_string();
    }
    let items: String = lines
        .iter()
        .map(|line| format!("<li>{}</li>", escape_html(line)))
        .collect();
    format!("<div class='panel summary'><h3>Conversation summary</h3><ol>{items}</ol></div>")
}

fn render_message(message: &Message) -> String {
    format!(
        "<div class='msg {role}'><div class='role'>{role}</div>{content}</div>",
        role = message.role.as_str(),
        content = render_markup(&message.content),
    )
}

pub fn render_transcript(state: &SessionState, options: &NormalizeOptions) -> String {
    let image = chart_preview(state, options)
        .map(|src| {
            format!(
                "<div class='chart'><img src='{}' alt='uploaded chart'></div>",
                escape_html(&src)
            )
        })
        .unwrap_or_default();
    let messages: String = state.messages().iter().map(render_message).collect();
    format!(
        "<!doctype html>\n<html>\n<head>\n  <meta charset='utf-8'>\n  <title>Chart Co-pilot Transcript</title>\n  <style>{PAGE_STYLE}</style>\n</head>\n<body>\n  <main style='margin: 20px auto;'>\n    <h1>Chart Co-pilot Transcript</h1>\n    {image}\n    <div class='panel'>{messages}</div>\n  </main>\n</body>\n</html>\n"
    )
}

/// Decodes and re-encodes the whole upload, so callers run it off the
/// async workers.
pub fn chart_preview(state: &SessionState, options: &NormalizeOptions) -> Option<String> {
    let image = state.image()?;
    normalize_image(image.bytes(), options)
        .ok()
        .map(|encoded| encoded.data_url())
}

/// Escapes text, then turns `**bold**` pairs into `<strong>` and line
/// breaks into `<br>`. An unmatched `**` is left as typed.
pub fn render_markup(text: &str) -> String {
    let escaped = escape_html(text.trim());
    let pieces: Vec<&str> = escaped.split("**").collect();
    let mut out = String::with_capacity(escaped.len());
    let pairs = (pieces.len() - 1) / 2;
    for (idx, piece) in pieces.iter().enumerate() {
        if idx > 0 {
            let bold_index = (idx - 1) / 2;
            if bold_index < pairs {
                out.push_str(if idx % 2 == 1 { "<strong>" } else { "</strong>" });
            } else {
                out.push_str("**");
            }
        }
        out.push_str(piece);
    }
    out.replace('\n', "<br>")
}

pub fn escape_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use base64::Engine as _;
    use copilot_contracts::messages::{Role, UploadedImage};
    use copilot_contracts::session::SessionState;
    use copilot_engine::NormalizeOptions;

    use super::{
        chart_preview, escape_html, render_markup, render_page, render_transcript, PageView,
    };
    use crate::test_support::chart_png;

    fn conversing() -> SessionState {
        let mut state = SessionState::with_id("session-1");
        state
            .record_initial_analysis(
                UploadedImage::new("chart.png", chart_png()),
                "**Overview:** OEE by shift.\n\n**Insights:** <b>Night</b> shift lags.",
            )
            .unwrap();
        state
    }

    #[test]
    fn escape_html_covers_markup_characters() {
        assert_eq!(
            escape_html("<a href=\"x\">Tom & 'Jerry'</a>"),
            "&lt;a href=&quot;x&quot;&gt;Tom &amp; &#x27;Jerry&#x27;&lt;/a&gt;"
        );
    }

    #[test]
    fn markup_bolds_pairs_and_keeps_stray_markers() {
        assert_eq!(
            render_markup("**Overview:** up\nnext"),
            "<strong>Overview:</strong> up<br>next"
        );
        assert_eq!(render_markup("2 ** 3 = 8"), "2 ** 3 = 8");
        assert_eq!(
            render_markup("**a** and **b** then **"),
            "<strong>a</strong> and <strong>b</strong> then **"
        );
    }

    #[test]
    fn empty_session_shows_upload_form() {
        let state = SessionState::with_id("session-1");
        let html = render_page(&PageView {
            state: &state,
            notice: None,
            preview: None,
            model: "gpt-4o",
        });
        assert!(html.contains("action='/upload'"));
        assert!(html.contains("accept='.jpg,.jpeg,.png,.bmp,.tiff'"));
        assert!(html.contains("No conversation yet."));
        assert!(!html.contains("action='/ask'"));
    }

    #[test]
    fn conversing_session_shows_log_suggestions_and_banner() {
        let mut state = conversing();
        state
            .set_suggestions(
                ["A?", "B?", "C <b>?", "D?"]
                    .iter()
                    .map(|q| q.to_string())
                    .collect(),
            )
            .unwrap();
        let preview = chart_preview(&state, &NormalizeOptions::default()).unwrap();
        let html = render_page(&PageView {
            state: &state,
            notice: Some("The analysis service could not be reached."),
            preview: Some(&preview),
            model: "gpt-4o",
        });
        assert!(html.contains("role='alert'>The analysis service could not be reached."));
        assert!(html.contains("<strong>Overview:</strong>"));
        assert!(html.contains("&lt;b&gt;Night&lt;/b&gt;"));
        assert!(html.contains("src='data:image/jpeg;base64,/9j/"));
        assert!(html.contains("action='/suggestions/4'"));
        assert!(html.contains("C &lt;b&gt;?"));
        assert!(html.contains("action='/ask'"));
        assert!(!html.contains("action='/upload'"));
    }

    #[test]
    fn transcript_lists_every_message_in_order() {
        let mut state = conversing();
        state.record_turn("Why <night>?", "Staffing.").unwrap();
        let html = render_transcript(&state, &NormalizeOptions::default());
        let upload = html
            .find(&format!("class='msg {}'", Role::User.as_str()))
            .unwrap();
        let question = html.find("Why &lt;night&gt;?").unwrap();
        let answer = html.find("Staffing.").unwrap();
        assert!(upload < question && question < answer);
        assert!(html.contains("data:image/jpeg;base64,"));
    }

    #[test]
    fn chart_preview_follows_normalize_options() {
        let state = conversing();
        let preview = chart_preview(
            &state,
            &NormalizeOptions {
                max_dimension: Some(6),
                ..NormalizeOptions::default()
            },
        )
        .unwrap();
        let encoded = preview.strip_prefix("data:image/jpeg;base64,").unwrap();
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (6, 4));

        assert!(chart_preview(&SessionState::with_id("empty"), &NormalizeOptions::default()).is_none());
    }
}
