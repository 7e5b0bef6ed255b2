use url::Url;
use urlencoding::encode;

const INVITE_PREFIX: &str = "cowatch://join?";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InviteLink {
    pub room_id: String,
    /// Coordinator socket URL, when the inviter was not on the default server
    pub server: Option<String>,
}

pub fn build_invite_url(room_id: &str, server: Option<&str>) -> String {
    let mut params = vec![format!("room={}", encode(room_id))];
    if let Some(server) = server.filter(|s| !s.is_empty()) {
        params.push(format!("server={}", encode(server)));
    }
    format!("{}{}", INVITE_PREFIX, params.join("&"))
}

pub fn parse_invite_url(input: &str) -> Option<InviteLink> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }

    let normalized = if trimmed.starts_with("cowatch://")
        || trimmed.starts_with("http://")
        || trimmed.starts_with("https://")
    {
        trimmed.to_string()
    } else {
        format!("{}{}", INVITE_PREFIX, trimmed.trim_start_matches('?'))
    };

    let url = Url::parse(&normalized).ok()?;
    let mut room_id = None;
    let mut server = None;

    // query_pairs already percent-decodes
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "room" => room_id = Some(value.into_owned()),
            "server" => server = Some(value.into_owned()),
            _ => {}
        }
    }

    let room_id = room_id.filter(|id| !id.trim().is_empty())?;
    Some(InviteLink {
        room_id,
        server: server.filter(|s| !s.is_empty()),
    })
}

pub fn looks_like_invite(arg: &str) -> bool {
    arg.starts_with("cowatch://") || arg.starts_with("http://") || arg.starts_with("https://")
}
