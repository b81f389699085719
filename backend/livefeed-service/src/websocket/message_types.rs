use serde::{Deserialize, Serialize};

use crate::models::Post;

/// Inbound WebSocket events from client to server
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum WsInboundEvent {
    /// Submit a post over the socket instead of `POST /api/posts`
    #[serde(rename = "new_post")]
    NewPost {
        #[serde(default, alias = "name")]
        author: Option<String>,
        #[serde(default, alias = "text")]
        message: Option<String>,
        #[serde(default)]
        image: Option<InlineImage>,
    },
}

/// Image sent inline with a socket submission
#[derive(Debug, Deserialize)]
pub struct InlineImage {
    pub filename: String,
    /// Base64 (standard alphabet) encoded file contents
    pub data: String,
}

/// Outbound WebSocket events from server to client
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum WsOutboundEvent<'a> {
    /// The whole feed; sent on connect and after every mutation
    #[serde(rename = "feed")]
    Feed { version: u64, posts: &'a [Post] },

    /// Acknowledges a socket submission to the client that sent it
    #[serde(rename = "post_created")]
    PostCreated { post: &'a Post },

    #[serde(rename = "error")]
    Error { message: String },
}

impl WsOutboundEvent<'_> {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_new_post_with_inline_image() {
        let raw = r#"{"type":"new_post","author":"a","message":"hi",
                      "image":{"filename":"x.png","data":"aGk="}}"#;

        match serde_json::from_str::<WsInboundEvent>(raw).unwrap() {
            WsInboundEvent::NewPost {
                author,
                message,
                image,
            } => {
                assert_eq!(author.as_deref(), Some("a"));
                assert_eq!(message.as_deref(), Some("hi"));
                assert_eq!(image.unwrap().filename, "x.png");
            }
        }
    }

    #[test]
    fn new_post_fields_are_optional() {
        let event: WsInboundEvent = serde_json::from_str(r#"{"type":"new_post"}"#).unwrap();
        assert!(matches!(
            event,
            WsInboundEvent::NewPost {
                author: None,
                message: None,
                image: None
            }
        ));
    }

    #[test]
    fn feed_event_is_tagged() {
        let posts = vec![Post::new("a".into(), "hi".into(), None)];
        let json = WsOutboundEvent::Feed {
            version: 3,
            posts: &posts,
        }
        .to_json()
        .unwrap();

        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "feed");
        assert_eq!(value["version"], 3);
        assert_eq!(value["posts"].as_array().unwrap().len(), 1);
    }
}
