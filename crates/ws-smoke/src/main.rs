use futures_util::{SinkExt, StreamExt};
use tokio::time::{timeout, Duration};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

/// Connects to the camera event socket, optionally flips landmarks on a
/// camera to provoke an event, and prints the first event received.
#[tokio::main]
async fn main() {
    let mut args = std::env::args().skip(1);
    let raw = args.next().unwrap_or_else(|| "ws://127.0.0.1:8080/ws/cameras".to_string());
    let camera_id = args.next();

    let url = match Url::parse(&raw) {
        Ok(url) => url,
        Err(e) => {
            eprintln!("Invalid URL {}: {}", raw, e);
            std::process::exit(1);
        }
    };
    eprintln!("Connecting to {}", url);
    let (ws_stream, _) = match connect_async(url.as_str()).await {
        Ok(conn) => conn,
        Err(e) => {
            eprintln!("WS connect failed: {}", e);
            std::process::exit(1);
        }
    };
    let (mut write, mut read) = ws_stream.split();

    // Application-level ping; the server answers with {"type":"pong"}
    let _ = write.send(Message::Text(r#"{"type":"ping"}"#.to_string())).await;

    if let Some(camera_id) = camera_id {
        if let Err(e) = toggle_landmarks(&url, &camera_id).await {
            eprintln!("Failed to toggle landmarks on {}: {}", camera_id, e);
        }
    }

    // Wait up to 5s for one camera event, then print and exit
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        match timeout(remaining, read.next()).await {
            Ok(Some(Ok(Message::Text(t)))) => {
                if t.contains(r#""type":"pong""#) {
                    eprintln!("Server answered ping");
                    continue;
                }
                println!("WS event: {}", t);
                return;
            }
            Ok(Some(Ok(other))) => {
                println!("WS non-text message: {:?}", other);
            }
            Ok(Some(Err(e))) => {
                eprintln!("WS receive error: {}", e);
                std::process::exit(2);
            }
            Ok(None) => {
                eprintln!("WS closed by server");
                std::process::exit(3);
            }
            Err(_) => {
                eprintln!("Timeout waiting for camera event");
                std::process::exit(4);
            }
        }
    }
}

/// HTTP URL of the toggle endpoint on the same host as the socket.
fn toggle_url(ws_url: &Url, camera_id: &str) -> Option<Url> {
    let mut http = ws_url.clone();
    let scheme = if ws_url.scheme() == "wss" { "https" } else { "http" };
    http.set_scheme(scheme).ok()?;
    http.set_query(None);
    http.set_path(&format!("/camera/{}/toggle_landmarks", camera_id));
    Some(http)
}

async fn toggle_landmarks(ws_url: &Url, camera_id: &str) -> Result<(), Box<dyn std::error::Error>> {
    let url = toggle_url(ws_url, camera_id).ok_or("cannot derive HTTP URL")?;
    let response = reqwest::Client::new().post(url.as_str()).send().await?;
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    eprintln!("Toggle landmarks: {} {}", status, body);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggle_url_follows_socket_host() {
        let ws = Url::parse("ws://10.0.0.5:8080/ws/cameras?camera_id=front").unwrap();
        assert_eq!(
            toggle_url(&ws, "front").unwrap().as_str(),
            "http://10.0.0.5:8080/camera/front/toggle_landmarks"
        );
        let wss = Url::parse("wss://cams.example/ws/cameras").unwrap();
        assert_eq!(
            toggle_url(&wss, "robot").unwrap().as_str(),
            "https://cams.example/camera/robot/toggle_landmarks"
        );
    }
}
