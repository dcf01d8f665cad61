pub mod company;
pub mod items;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::config::Rules;
use crate::models::{Message, Order};

/// An item or instruction line waiting for a company to claim it. Each line
/// remembers where it came from so a later flush credits the right
/// contributors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferedLine {
    pub text: String,
    pub message_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct ParseOutcome {
    pub orders: Vec<Order>,
    /// Item lines that never found a company. Reported, never silently
    /// discarded.
    pub unresolved: Vec<BufferedLine>,
}

/// Single forward pass with one-message lookahead and a pending-items
/// buffer, then per-company consolidation. Contributing messages are
/// enriched in place with their company and parsed items.
pub fn parse_orders(rules: &Rules, messages: &mut [Message]) -> ParseOutcome {
    let mut raw_orders: Vec<Order> = Vec::new();
    let mut buffer: Vec<BufferedLine> = Vec::new();

    let mut i = 0;
    while i < messages.len() {
        let lines: Vec<String> = messages[i].lines().iter().map(|l| l.to_string()).collect();
        if lines.is_empty() {
            i += 1;
            continue;
        }
        let has_items = lines.iter().any(|l| rules.is_item_line(l));

        // Bare company mention: claim the pending buffer. An empty buffer
        // means the mention is consumed with no order; that data-loss case
        // is deliberate and logged.
        if !has_items && lines.len() == 1 {
            if let Some(canonical) = company::resolve(&rules.config.aliases, &lines[0]) {
                let canonical = canonical.to_string();
                messages[i].company_name = Some(canonical.clone());
                if buffer.is_empty() {
                    debug!("company mention `{canonical}` with nothing pending, consumed");
                } else {
                    raw_orders.push(flush_buffer(
                        rules,
                        &canonical,
                        std::mem::take(&mut buffer),
                        &messages[i],
                    ));
                }
                i += 1;
                continue;
            }
        }

        if has_items {
            // Items now, label next: the following message is consumed as
            // the company label and not reprocessed.
            if let Some(canonical) = next_is_bare_company(rules, messages, i) {
                let order = order_from_message(rules, &canonical, &messages[i]);
                enrich(&mut messages[i], &canonical, &order.items_text);
                messages[i + 1].company_name = Some(canonical);
                raw_orders.push(with_label_id(order, &messages[i + 1].id));
                i += 2;
                continue;
            }

            // Company embedded in the same message.
            if let Some(canonical) = lines
                .iter()
                .find_map(|l| company::resolve(&rules.config.aliases, l))
                .map(str::to_string)
            {
                let order = order_from_message(rules, &canonical, &messages[i]);
                enrich(&mut messages[i], &canonical, &order.items_text);
                raw_orders.push(order);
                i += 1;
                continue;
            }

            // No company in sight: item and instruction lines wait in the
            // buffer for a later mention.
            let parsed: Vec<_> = lines
                .iter()
                .filter(|l| rules.is_item_line(l))
                .map(|l| items::parse_line(l))
                .collect();
            messages[i].parsed_items = parsed;
            for line in &lines {
                if rules.is_item_line(line) || rules.is_greeting_line(line) {
                    buffer.push(BufferedLine {
                        text: line.clone(),
                        message_id: messages[i].id.clone(),
                        timestamp: messages[i].timestamp,
                    });
                }
            }
        }

        i += 1;
    }

    if !buffer.is_empty() {
        warn!(
            "{} line(s) never resolved to a company, reporting unresolved",
            buffer.len()
        );
    }

    ParseOutcome {
        orders: consolidate(raw_orders),
        unresolved: buffer,
    }
}

/// Lookahead: is the next message a pure single-line company mention?
fn next_is_bare_company(rules: &Rules, messages: &[Message], i: usize) -> Option<String> {
    let next = messages.get(i + 1)?;
    let lines = next.lines();
    if lines.len() != 1 || rules.is_item_line(lines[0]) {
        return None;
    }
    company::resolve(&rules.config.aliases, lines[0]).map(str::to_string)
}

/// Build an order from one message's own lines: items via the item
/// predicate, instructions via the greeting predicate (item status wins on
/// conflict), everything else excluded.
fn order_from_message(rules: &Rules, canonical: &str, message: &Message) -> Order {
    let mut items_text = Vec::new();
    let mut instructions = Vec::new();
    for line in message.lines() {
        if rules.is_item_line(line) {
            items_text.push(line.to_string());
        } else if rules.is_greeting_line(line) {
            instructions.push(line.to_string());
        }
    }
    Order {
        company_name: canonical.to_string(),
        items_text,
        instructions,
        timestamp: message.timestamp,
        message_ids: vec![message.id.clone()],
    }
}

fn flush_buffer(
    rules: &Rules,
    canonical: &str,
    buffer: Vec<BufferedLine>,
    label: &Message,
) -> Order {
    let mut items_text = Vec::new();
    let mut instructions = Vec::new();
    let mut message_ids: Vec<String> = Vec::new();
    let mut earliest = label.timestamp;
    for line in &buffer {
        if rules.is_item_line(&line.text) {
            items_text.push(line.text.clone());
        } else {
            instructions.push(line.text.clone());
        }
        if !message_ids.contains(&line.message_id) {
            message_ids.push(line.message_id.clone());
        }
        earliest = earliest.min(line.timestamp);
    }
    message_ids.push(label.id.clone());
    Order {
        company_name: canonical.to_string(),
        items_text,
        instructions,
        timestamp: earliest,
        message_ids,
    }
}

fn enrich(message: &mut Message, canonical: &str, items_text: &[String]) {
    message.company_name = Some(canonical.to_string());
    message.parsed_items = items_text.iter().map(|l| items::parse_line(l)).collect();
}

fn with_label_id(mut order: Order, label_id: &str) -> Order {
    order.message_ids.push(label_id.to_string());
    order
}

/// Merge raw orders sharing a canonical company: items, instructions and
/// contributor ids concatenate in encounter order; the earliest timestamp
/// wins. Zero-item orders are never emitted.
fn consolidate(raw: Vec<Order>) -> Vec<Order> {
    let mut merged: Vec<Order> = Vec::new();
    for order in raw {
        if order.items_text.is_empty() {
            continue;
        }
        match merged
            .iter_mut()
            .find(|o| o.company_name == order.company_name)
        {
            Some(existing) => {
                existing.items_text.extend(order.items_text);
                existing.instructions.extend(order.instructions);
                existing.message_ids.extend(order.message_ids);
                existing.timestamp = existing.timestamp.min(order.timestamp);
            }
            None => merged.push(order),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::models::tests::message;
    use chrono::{Duration, TimeZone};

    fn rules() -> Rules {
        Rules::compile(Config::default()).unwrap()
    }

    fn sequence(contents: &[&str]) -> Vec<Message> {
        contents
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let mut m = message(&format!("m{i}"), c);
                m.timestamp = Utc.with_ymd_and_hms(2025, 9, 13, 8, 0, 0).unwrap()
                    + Duration::minutes(i as i64);
                m
            })
            .collect()
    }

    #[test]
    fn items_then_company_label() {
        let r = rules();
        let mut msgs = sequence(&[
            "Good morning may I please order\n2×5kgTomato\n2×5kgMushroom\n10kgOnions\nTnx that's all",
            "Venue",
        ]);
        let out = parse_orders(&r, &mut msgs);
        assert_eq!(out.orders.len(), 1);
        let order = &out.orders[0];
        assert_eq!(order.company_name, "Venue");
        assert_eq!(
            order.items_text,
            vec!["2×5kgTomato", "2×5kgMushroom", "10kgOnions"]
        );
        assert_eq!(order.instructions.len(), 2);
        assert_eq!(order.message_ids, vec!["m0", "m1"]);
        assert!(out.unresolved.is_empty());
        assert_eq!(msgs[0].company_name.as_deref(), Some("Venue"));
        assert_eq!(msgs[0].parsed_items.len(), 3);
    }

    #[test]
    fn mixed_single_message() {
        let r = rules();
        let mut msgs = sequence(&[
            "Hie, pliz send for Luma\n3* punnets strawberries\n1* bag red onions\n1* bag oranges",
            "Luma",
        ]);
        let out = parse_orders(&r, &mut msgs);
        assert_eq!(out.orders.len(), 1);
        let order = &out.orders[0];
        assert_eq!(order.company_name, "Luma");
        assert_eq!(
            order.items_text,
            vec![
                "3* punnets strawberries",
                "1* bag red onions",
                "1* bag oranges"
            ]
        );
    }

    #[test]
    fn multi_message_consolidation() {
        let r = rules();
        let mut msgs = sequence(&[
            "3x veg box for Thursday",
            "Marco",
            "Please add eggs to Marco boxes",
        ]);
        let out = parse_orders(&r, &mut msgs);
        assert_eq!(out.orders.len(), 1);
        let order = &out.orders[0];
        assert_eq!(order.company_name, "Marco");
        assert_eq!(order.items_text.len(), 2);
        assert!(order.message_ids.contains(&"m0".to_string()));
        assert!(order.message_ids.contains(&"m2".to_string()));
    }

    #[test]
    fn buffered_items_flush_to_later_mention() {
        let r = rules();
        let mut msgs = sequence(&[
            "Good morning\n2x5kg tomatoes\n3 bags onions\nseparate invoice please",
            "sure, will do",
            "casa bella",
        ]);
        let out = parse_orders(&r, &mut msgs);
        assert_eq!(out.orders.len(), 1);
        let order = &out.orders[0];
        assert_eq!(order.company_name, "Casa Bella");
        assert_eq!(order.items_text, vec!["2x5kg tomatoes", "3 bags onions"]);
        // Buffered greeting lines ride along as instructions.
        assert_eq!(
            order.instructions,
            vec!["Good morning", "separate invoice please"]
        );
        // Earliest contributor timestamp wins over the label's.
        assert_eq!(order.timestamp, msgs[0].timestamp);
        assert_eq!(order.message_ids, vec!["m0", "m2"]);
        assert!(out.unresolved.is_empty());
    }

    #[test]
    fn lone_company_mention_with_empty_buffer_is_consumed() {
        let r = rules();
        let mut msgs = sequence(&["Venue", "2x5kg tomatoes", "Marco"]);
        let out = parse_orders(&r, &mut msgs);
        // The leading mention creates nothing; the items attach to the
        // trailing label instead.
        assert_eq!(out.orders.len(), 1);
        assert_eq!(out.orders[0].company_name, "Marco");
        assert_eq!(msgs[0].company_name.as_deref(), Some("Venue"));
    }

    #[test]
    fn unresolved_buffer_is_reported_not_dropped() {
        let r = rules();
        let mut msgs = sequence(&["2x5kg tomatoes\n3 bags onions"]);
        let out = parse_orders(&r, &mut msgs);
        assert!(out.orders.is_empty());
        assert_eq!(out.unresolved.len(), 2);
        assert_eq!(out.unresolved[0].message_id, "m0");
    }

    #[test]
    fn non_order_chatter_is_ignored() {
        let r = rules();
        let mut msgs = sequence(&["jammer, verkeerde groep", "sure, no problem"]);
        let out = parse_orders(&r, &mut msgs);
        assert!(out.orders.is_empty());
        assert!(out.unresolved.is_empty());
    }

    #[test]
    fn reparsing_is_idempotent() {
        let r = rules();
        let contents = [
            "Good morning may I please order\n2×5kgTomato\n10kgOnions",
            "Venue",
            "3x veg box",
            "Marco",
            "Please add eggs to Marco boxes",
        ];
        let mut first = sequence(&contents);
        let mut second = sequence(&contents);
        let a = parse_orders(&r, &mut first);
        let b = parse_orders(&r, &mut second);
        assert_eq!(a.orders, b.orders);
        assert_eq!(a.unresolved, b.unresolved);
    }

    #[test]
    fn consolidation_merges_in_encounter_order() {
        let r = rules();
        let mut msgs = sequence(&[
            "2x5kg tomatoes for venue",
            "1 x 5kg carrots",
            "venue",
            "3 bags onions for venue",
        ]);
        let out = parse_orders(&r, &mut msgs);
        assert_eq!(out.orders.len(), 1);
        let order = &out.orders[0];
        assert_eq!(order.company_name, "Venue");
        assert_eq!(
            order.items_text,
            vec![
                "2x5kg tomatoes for venue",
                "1 x 5kg carrots",
                "3 bags onions for venue"
            ]
        );
        assert_eq!(order.timestamp, msgs[0].timestamp);
    }

    #[test]
    fn zero_item_orders_are_never_emitted() {
        let r = rules();
        // Nothing item-like ever enters the buffer, so the mention finds it
        // empty.
        let mut msgs = sequence(&["please note the gate code", "Venue"]);
        let out = parse_orders(&r, &mut msgs);
        assert!(out.orders.is_empty());
    }

    #[test]
    fn label_message_is_not_reprocessed() {
        let r = rules();
        // If "Venue" were reprocessed after serving as the label, the
        // buffered carrot line would wrongly flush to it.
        let mut msgs = sequence(&[
            "1 x 5kg carrots",
            "2x5kg tomatoes\nfor venue pliz",
            "Venue",
        ]);
        let out = parse_orders(&r, &mut msgs);
        assert_eq!(out.orders.len(), 1);
        assert_eq!(out.orders[0].items_text, vec!["2x5kg tomatoes"]);
        assert_eq!(out.unresolved.len(), 1);
        assert_eq!(out.unresolved[0].text, "1 x 5kg carrots");
    }
}
