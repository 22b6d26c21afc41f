//! Event correlation: four event streams in, one ordered action tree out.
//!
//! Correlation never fails. Orphan responses, failures for unknown
//! requests, and bodies without a matching action are dropped silently;
//! `data:` URIs never become actions at all.

use std::collections::HashMap;

use url::Url;

use crate::models::{CrawlAction, Initiator, InitiatorKind};

use super::events::BrowserEvents;

/// Builds the ordered action list from the collected debugger events.
///
/// Redirect hops arrive as request events carrying a `redirect_response`
/// for the action identified by their loader id; that action also becomes
/// the hop's parent. The classification pass then marks children of 3xx
/// responses as `redirect` and roots as `user`, and the final sort orders
/// actions by request start time (insertion order on ties) with parent
/// indices rewritten to match.
pub fn actions_from_events(events: BrowserEvents) -> Vec<CrawlAction> {
    // request-id -> index of the most recent action for that id
    let mut by_request: HashMap<String, usize> = HashMap::new();
    let mut actions: Vec<CrawlAction> = Vec::new();

    for sent in events.requests {
        if let Ok(url) = Url::parse(&sent.request.url) {
            if url.scheme() == "data" {
                continue;
            }
        }

        let mut action = CrawlAction {
            parent: None,
            initiator: Initiator {
                kind: InitiatorKind::from_protocol(&sent.initiator_kind),
                stack: sent.initiator_stack,
            },
            host: None,
            request: sent.request,
            response: None,
            error: None,
            body: None,
            started_at: sent.wall_time,
        };

        if let Some(&parent_idx) = by_request.get(&sent.loader_id) {
            actions[parent_idx].response = sent.redirect_response;
            action.parent = Some(parent_idx);
        }

        by_request.insert(sent.request_id, actions.len());
        actions.push(action);
    }

    for received in events.responses {
        if let Some(&idx) = by_request.get(&received.request_id) {
            actions[idx].response = Some(received.response);
        }
    }

    for failure in events.failures {
        if let Some(&idx) = by_request.get(&failure.request_id) {
            // first error wins
            if actions[idx].error.is_none() {
                actions[idx].error = Some(failure.error_text);
            }
        }
    }

    for body in events.bodies {
        if let Some(&idx) = by_request.get(&body.request_id) {
            actions[idx].body = Some(body.body);
        }
    }

    classify(&mut actions);
    sort_by_start(&mut actions);

    actions
}

fn classify(actions: &mut [CrawlAction]) {
    for i in 0..actions.len() {
        match actions[i].parent {
            Some(parent_idx) => {
                let redirected = actions[parent_idx]
                    .response
                    .as_ref()
                    .map(|r| (300..400).contains(&r.status))
                    .unwrap_or(false);
                if redirected {
                    actions[i].initiator.kind = InitiatorKind::Redirect;
                }
            }
            None => {
                actions[i].initiator.kind = InitiatorKind::User;
            }
        }
    }
}

/// Stable sort by start time, rewriting parent indices to the new order.
/// Parents start no later than their children, so they still precede them.
fn sort_by_start(actions: &mut Vec<CrawlAction>) {
    let mut order: Vec<usize> = (0..actions.len()).collect();
    order.sort_by(|&a, &b| {
        actions[a]
            .started_at
            .partial_cmp(&actions[b].started_at)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut new_pos = vec![0usize; actions.len()];
    for (pos, &old) in order.iter().enumerate() {
        new_pos[old] = pos;
    }

    let mut sorted: Vec<CrawlAction> = Vec::with_capacity(actions.len());
    for &old in &order {
        let mut action = actions[old].clone();
        action.parent = action.parent.map(|p| new_pos[p]);
        sorted.push(action);
    }

    *actions = sorted;
}
