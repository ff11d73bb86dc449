use chain_core::NodeSnapshot;
use futures_util::future::join_all;
use serde::Serialize;
use tracing::warn;

/// A peer call that returned a transport error or missed the per-call
/// deadline. Reported in responses, never fatal to the local operation.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerFailure {
    pub peer: String,
    pub error: String,
}

/// POSTs `body` to `{peer}{path}` on every peer concurrently and collects
/// the failures.
pub async fn broadcast_json<T: Serialize>(
    client: &reqwest::Client,
    peers: &[String],
    path: &str,
    body: &T,
) -> Vec<PeerFailure> {
    let calls = peers.iter().map(|peer| {
        let url = format!("{peer}{path}");
        let peer = peer.clone();
        async move {
            match client.post(&url).json(body).send().await {
                Ok(_) => None,
                Err(err) => {
                    warn!(peer = %peer, %err, "peer broadcast failed");
                    Some(PeerFailure {
                        peer,
                        error: err.to_string(),
                    })
                }
            }
        }
    });
    join_all(calls).await.into_iter().flatten().collect()
}

/// Pulls the full snapshot from every peer concurrently. Unreachable peers
/// end up in the failure list; their chains simply don't compete.
pub async fn fetch_snapshots(
    client: &reqwest::Client,
    peers: &[String],
) -> (Vec<NodeSnapshot>, Vec<PeerFailure>) {
    let calls = peers.iter().map(|peer| {
        let url = format!("{peer}/blockchain");
        let peer = peer.clone();
        async move {
            let result = async { client.get(&url).send().await?.json::<NodeSnapshot>().await }.await;
            result.map_err(|err| {
                warn!(peer = %peer, %err, "peer snapshot fetch failed");
                PeerFailure {
                    peer,
                    error: err.to_string(),
                }
            })
        }
    });

    let mut snapshots = Vec::new();
    let mut failures = Vec::new();
    for outcome in join_all(calls).await {
        match outcome {
            Ok(snapshot) => snapshots.push(snapshot),
            Err(failure) => failures.push(failure),
        }
    }
    (snapshots, failures)
}
