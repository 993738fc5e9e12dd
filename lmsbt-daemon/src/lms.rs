/*!
 * LMS Control Client
 * Minimal JSON-RPC client for the Lyrion Music Server
 */

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::controller::CaptureControl;

#[derive(Debug, Error)]
pub enum LmsError {
    #[error("request to server failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected response from server: {0}")]
    Response(#[from] serde_json::Error),
    #[error("no players found on server")]
    NoPlayers,
}

/// Client for the `jsonrpc.js` endpoint. Commands are the same string
/// vectors the LMS web interface issues.
#[derive(Debug, Clone)]
pub struct LmsClient {
    http: reqwest::Client,
    url: String,
}

impl LmsClient {
    pub fn new(host: &str, port: u16) -> Result<Self, LmsError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            url: format!("http://{}:{}/jsonrpc.js", host, port),
        })
    }

    /// Issue one `slim.request` command addressed to the given player id.
    /// Server-wide queries use an empty player id.
    pub async fn request(&self, player: &str, command: &[&str]) -> Result<Value, LmsError> {
        let body = json!({
            "id": 1,
            "method": "slim.request",
            "params": [player, command],
        });
        debug!("lms request for [{}]: {:?}", player, command);
        let response = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        let reply: RpcReply = response.json().await?;
        Ok(reply.result)
    }

    pub async fn players(&self) -> Result<Vec<PlayerInfo>, LmsError> {
        let result = self.request("", &["players", "0", "99"]).await?;
        match result.get("players_loop") {
            Some(list) => Ok(serde_json::from_value(list.clone())?),
            None => Ok(Vec::new()),
        }
    }

    /// Resolve the player to control: a powered one if any, otherwise the
    /// preferred name or id, otherwise whatever the server lists first.
    pub async fn find_player(&self, preferred: &str) -> Result<LmsPlayer, LmsError> {
        let players = self.players().await?;
        let chosen = select_player(&players, preferred).ok_or(LmsError::NoPlayers)?;
        if chosen.power != 0 {
            info!("found active player {} [{}]", chosen.name, chosen.playerid);
        } else {
            info!("no powered player, using {} [{}]", chosen.name, chosen.playerid);
        }
        Ok(LmsPlayer {
            client: self.clone(),
            id: chosen.playerid.clone(),
            name: chosen.name.clone(),
        })
    }
}

#[derive(Deserialize)]
struct RpcReply {
    #[serde(default)]
    result: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlayerInfo {
    pub playerid: String,
    pub name: String,
    #[serde(default)]
    pub power: u8,
}

fn select_player<'a>(players: &'a [PlayerInfo], preferred: &str) -> Option<&'a PlayerInfo> {
    if let Some(player) = players.iter().find(|p| p.power != 0) {
        return Some(player);
    }
    if !preferred.is_empty() {
        if let Some(player) = players
            .iter()
            .find(|p| p.name == preferred || p.playerid == preferred)
        {
            return Some(player);
        }
    }
    players.first()
}

/// The Squeezebox player the daemon drives.
pub struct LmsPlayer {
    client: LmsClient,
    id: String,
    name: String,
}

impl LmsPlayer {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Switch to another player if the controlled one has been powered
    /// off. Check failures are logged and skipped; the next tick retries.
    pub async fn ensure_powered(&mut self, preferred: &str) {
        let result = match self.client.request(&self.id, &["status", "-", "1"]).await {
            Ok(result) => result,
            Err(e) => {
                warn!("status check for {} failed: {}", self.name, e);
                return;
            }
        };
        let powered = result.get("power").and_then(Value::as_u64).unwrap_or(1) != 0;
        if powered {
            return;
        }
        info!("player {} powered off, looking for another", self.name);
        match self.client.find_player(preferred).await {
            Ok(player) => {
                self.id = player.id;
                self.name = player.name;
            }
            Err(e) => warn!("player search failed: {}", e),
        }
    }
}

#[async_trait]
impl CaptureControl for LmsPlayer {
    async fn start_capture(&self, input: &str) -> Result<(), LmsError> {
        self.client
            .request(&self.id, &["playlist", "play", input])
            .await?;
        Ok(())
    }

    async fn stop_capture(&self) -> Result<(), LmsError> {
        self.client.request(&self.id, &["pause", "1"]).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player(id: &str, name: &str, power: u8) -> PlayerInfo {
        PlayerInfo {
            playerid: id.to_string(),
            name: name.to_string(),
            power,
        }
    }

    #[test]
    fn powered_player_wins_over_preferred() {
        let players = vec![
            player("aa:aa", "Galley", 0),
            player("bb:bb", "Aft Cabin", 1),
        ];
        let chosen = select_player(&players, "Galley").unwrap();
        assert_eq!(chosen.playerid, "bb:bb");
    }

    #[test]
    fn preferred_by_name_when_nothing_powered() {
        let players = vec![
            player("aa:aa", "Galley", 0),
            player("bb:bb", "Aft Cabin", 0),
        ];
        let chosen = select_player(&players, "Aft Cabin").unwrap();
        assert_eq!(chosen.playerid, "bb:bb");
    }

    #[test]
    fn preferred_by_id_when_nothing_powered() {
        let players = vec![
            player("aa:aa", "Galley", 0),
            player("bb:bb", "Aft Cabin", 0),
        ];
        let chosen = select_player(&players, "bb:bb").unwrap();
        assert_eq!(chosen.name, "Aft Cabin");
    }

    #[test]
    fn first_listed_as_a_last_resort() {
        let players = vec![
            player("aa:aa", "Galley", 0),
            player("bb:bb", "Aft Cabin", 0),
        ];
        let chosen = select_player(&players, "Saloon").unwrap();
        assert_eq!(chosen.playerid, "aa:aa");
    }

    #[test]
    fn empty_list_selects_nothing() {
        assert!(select_player(&[], "Aft Cabin").is_none());
    }

    #[test]
    fn parses_a_players_response() {
        let result: Value = serde_json::from_str(
            r#"{
                "count": 2,
                "players_loop": [
                    {
                        "playerid": "aa:bb:cc:dd:ee:ff",
                        "name": "Aft Cabin",
                        "power": 1,
                        "connected": 1,
                        "model": "squeezelite"
                    },
                    {
                        "playerid": "11:22:33:44:55:66",
                        "name": "Galley",
                        "power": 0,
                        "connected": 1,
                        "model": "squeezelite"
                    }
                ]
            }"#,
        )
        .unwrap();
        let players: Vec<PlayerInfo> =
            serde_json::from_value(result["players_loop"].clone()).unwrap();
        assert_eq!(players.len(), 2);
        assert_eq!(players[0].name, "Aft Cabin");
        assert_eq!(players[0].power, 1);
        assert_eq!(players[1].playerid, "11:22:33:44:55:66");
        assert_eq!(players[1].power, 0);
    }

    #[test]
    fn missing_players_loop_means_no_players() {
        let reply: RpcReply = serde_json::from_str(r#"{"result":{"count":0}}"#).unwrap();
        assert!(reply.result.get("players_loop").is_none());
    }
}
