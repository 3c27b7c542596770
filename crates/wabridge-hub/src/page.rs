//! Operator HTML page served at `/`.

use wabridge_core::lifecycle::ConnectionState;

/// What the page shows.
pub struct PageView<'a> {
    pub state: ConnectionState,
    /// `data:image/png;base64,...` while a QR is pending.
    pub qr_data_url: Option<String>,
    pub last_reason: Option<&'a str>,
    pub webhook_url: Option<&'a str>,
    pub uptime_secs: u64,
}

fn badge(state: ConnectionState) -> (&'static str, &'static str) {
    match state {
        ConnectionState::Starting => ("Iniciando", "#6b7280"),
        ConnectionState::AwaitingQr => ("Esperando QR", "#d97706"),
        ConnectionState::Connecting => ("Conectando", "#2563eb"),
        ConnectionState::Ready => ("Conectado", "#16a34a"),
        ConnectionState::Disconnected => ("Desconectado", "#dc2626"),
        ConnectionState::AuthFailed => ("Error de autenticación", "#7f1d1d"),
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

pub fn render(view: &PageView<'_>) -> String {
    let (label, color) = badge(view.state);
    let ready = view.state.is_ready();

    let refresh = if ready {
        ""
    } else {
        r#"<meta http-equiv="refresh" content="5">"#
    };

    let mut body = String::new();

    match (&view.qr_data_url, view.state) {
        (Some(url), _) => {
            body.push_str("<h2>Escanea el código QR</h2>");
            body.push_str("<p>WhatsApp → Dispositivos vinculados → Vincular un dispositivo</p>");
            body.push_str(&format!(r#"<img class="qr" src="{}" alt="QR">"#, url));
        }
        (None, ConnectionState::Ready) => {
            body.push_str(
                r#"<h2>Enviar mensaje de prueba</h2>
<form method="get" action="/send">
  <input name="phone" placeholder="5512345678" required>
  <input name="text" placeholder="Mensaje de prueba">
  <button type="submit">Enviar</button>
</form>
<h2>Administración</h2>
<form method="get" action="/restart">
  <input name="token" type="password" placeholder="Token de admin" required>
  <button type="submit">Reiniciar</button>
  <button type="submit" formaction="/logout">Cerrar sesión</button>
</form>"#,
            );
        }
        (None, ConnectionState::AuthFailed) => {
            body.push_str("<p>La autenticación falló. Reinicia la sesión con <code>/restart</code>.</p>");
        }
        (None, _) => {
            body.push_str("<p>Preparando la sesión de WhatsApp…</p>");
        }
    }

    if let Some(reason) = view.last_reason {
        body.push_str(&format!(
            r#"<p class="muted">Última desconexión: {}</p>"#,
            escape(reason)
        ));
    }

    let webhook = view
        .webhook_url
        .map(escape)
        .unwrap_or_else(|| "desactivado".to_string());

    format!(
        r#"<!DOCTYPE html>
<html lang="es">
<head>
<meta charset="utf-8">
{refresh}
<title>WhatsApp Bridge</title>
<style>
  body {{ font-family: system-ui, sans-serif; max-width: 560px; margin: 2rem auto; color: #111; }}
  .badge {{ display: inline-block; padding: .25rem .75rem; border-radius: 999px; color: #fff; background: {color}; }}
  .qr {{ width: 320px; height: 320px; image-rendering: pixelated; }}
  .muted {{ color: #6b7280; font-size: .9rem; }}
  input, button {{ padding: .4rem; margin: .2rem 0; }}
</style>
</head>
<body>
<h1>WhatsApp Bridge</h1>
<p><span class="badge">{label}</span></p>
{body}
<p class="muted">Webhook: {webhook} · Activo hace {uptime}s · <a href="/status">/status</a></p>
</body>
</html>"#,
        refresh = refresh,
        color = color,
        label = label,
        body = body,
        webhook = webhook,
        uptime = view.uptime_secs,
    )
}
