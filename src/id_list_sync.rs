use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;

use crate::diagnostics::{MarkerData, MarkerKey, StepKind};
use crate::network::SpecTransport;
use crate::spec_store::SpecStore;
use crate::spec_types::{IDList, IDListMetadata};

/// Reconcile the local table against the server manifest, fetching a delta
/// for every list that grew. One fetch task per changed list, all awaited
/// together; failures are reported and never abort the cycle.
pub(crate) async fn sync_id_lists(
    store: &Arc<SpecStore>,
    transport: &Arc<dyn SpecTransport>,
    manifest: &HashMap<String, IDListMetadata>,
) {
    store.diagnostics().mark_start(
        MarkerKey::GetIdListSources,
        Some(StepKind::Process),
        None,
        Some(MarkerData::IdListSources {
            id_list_count: manifest.len(),
        }),
    );

    let mut tasks = Vec::new();
    {
        let mut lists = store.id_lists();
        for (name, server) in manifest {
            let local = lists
                .entry(name.clone())
                .or_insert_with(|| IDList::new(name));

            let (Some(server_url), Some(file_id)) = (server.url.as_ref(), server.file_id.as_ref())
            else {
                continue;
            };
            if server.creation_time < local.creation_time {
                continue;
            }

            // A different fileID at an equal-or-newer creation time is a new
            // generation; the accumulated members belong to the old file and
            // the cursor restarts at zero.
            if local.file_id.as_deref() != Some(file_id.as_str()) {
                *local = IDList {
                    name: name.clone(),
                    url: Some(server_url.clone()),
                    file_id: Some(file_id.clone()),
                    creation_time: server.creation_time,
                    size: 0,
                    members: Default::default(),
                };
            }
            if server.size <= local.size {
                continue;
            }

            let Some(url) = local.url.clone() else {
                continue;
            };
            let call_count = store.next_download_call_count();
            tasks.push(tokio::spawn(download_id_list(
                Arc::clone(store),
                Arc::clone(transport),
                name.clone(),
                url,
                call_count,
            )));
        }
    }

    for result in join_all(tasks).await {
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => store.error_boundary().log_error("download_id_list", &e),
            Err(e) => store
                .error_boundary()
                .log_error("download_id_list", &format!("fetch task failed: {}", e)),
        }
    }

    store.diagnostics().mark_end(
        MarkerKey::GetIdListSources,
        true,
        Some(StepKind::Process),
        None,
        None,
    );

    // Drop whatever the server stopped advertising.
    store.id_lists().retain(|name, _| manifest.contains_key(name));
}

/// Fetch one list's pending bytes and patch the member set. The body is
/// fully read before any mutation, so a failed read never leaves a torn
/// patch behind. Every 50th call across the client's lifetime is
/// instrumented, which keeps marker volume flat no matter how many lists
/// exist.
async fn download_id_list(
    store: Arc<SpecStore>,
    transport: Arc<dyn SpecTransport>,
    name: String,
    url: String,
    call_count: u64,
) -> Result<(), String> {
    let from_byte = match store.id_lists().get(&name) {
        Some(list) => list.size,
        None => return Ok(()),
    };

    let instrument = call_count % 50 == 1;
    let marker_id = call_count.to_string();
    let diagnostics = Arc::clone(store.diagnostics());

    if instrument {
        diagnostics.mark_start(
            MarkerKey::GetIdList,
            Some(StepKind::NetworkRequest),
            None,
            Some(MarkerData::Network {
                marker_id: Some(marker_id.clone()),
                url: Some(url.clone()),
                status_code: None,
                sdk_region: None,
            }),
        );
    }

    let chunk = transport.fetch_id_list_chunk(&url, from_byte).await;

    if instrument {
        let (success, status_code, sdk_region) = match &chunk {
            Ok(chunk) => (chunk.is_success(), Some(chunk.status), chunk.sdk_region.clone()),
            Err(_) => (false, None, None),
        };
        diagnostics.mark_end(
            MarkerKey::GetIdList,
            success,
            Some(StepKind::NetworkRequest),
            None,
            Some(MarkerData::Network {
                marker_id: Some(marker_id.clone()),
                url: None,
                status_code,
                sdk_region,
            }),
        );
    }

    let chunk = chunk?;
    if !chunk.is_success() {
        // Cursor didn't move; the next cycle retries naturally.
        return Ok(());
    }

    if instrument {
        diagnostics.mark_start(
            MarkerKey::GetIdList,
            Some(StepKind::Process),
            None,
            Some(MarkerData::Network {
                marker_id: Some(marker_id.clone()),
                url: None,
                status_code: None,
                sdk_region: None,
            }),
        );
    }

    if chunk.body.len() <= 1 {
        return Ok(());
    }

    // A response that doesn't open with an operator, or that lacks a usable
    // content-length, means our cursor no longer lines up with the remote
    // log. Throw the whole list away; the next cycle re-fetches a fresh
    // generation from byte zero.
    let Some(content_length) = chunk.content_length else {
        store.id_lists().remove(&name);
        return Ok(());
    };
    if !chunk.body.starts_with('+') && !chunk.body.starts_with('-') {
        store.id_lists().remove(&name);
        return Ok(());
    }

    {
        let mut lists = store.id_lists();
        let Some(list) = lists.get_mut(&name) else {
            return Ok(());
        };
        for line in chunk.body.lines() {
            if line.len() <= 1 {
                continue;
            }
            if let Some(id) = line.strip_prefix('+') {
                list.members.insert(id.to_string());
            } else if let Some(id) = line.strip_prefix('-') {
                list.members.remove(id);
            }
        }
        // The header value is authoritative for the cursor, even when the
        // body carries trailing bytes the line parser skipped.
        list.size += content_length;
    }

    if instrument {
        diagnostics.mark_end(
            MarkerKey::GetIdList,
            true,
            Some(StepKind::Process),
            None,
            Some(MarkerData::Network {
                marker_id: Some(marker_id),
                url: None,
                status_code: None,
                sdk_region: None,
            }),
        );
    }
    Ok(())
}
