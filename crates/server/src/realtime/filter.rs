//! Per-subscriber event visibility.

use chrono::Utc;

use cartpool_core::{Capabilities, Identity, Order, OrderEvent};

/// Decide whether `event` may be delivered to `viewer`.
///
/// Order-scoped events (deadline changes, invites) go to every subscriber.
/// Item events are gated on the viewer's standing toward the item's owner:
/// when the order hides items, only the owner and admins see them. The
/// decision is pure and is made per subscriber at fan-out time; sequence
/// numbers are assigned room-wide first, so a restricted viewer may observe
/// gaps where withheld events would have been.
#[must_use]
pub fn should_deliver(event: &OrderEvent, viewer: &Identity, order: &Order) -> bool {
    match event.item() {
        None => true,
        Some(item) => Capabilities::new(viewer, order, Utc::now()).can_view_item(item),
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;
    use uuid::Uuid;

    use cartpool_core::{Actor, ActorKey, Item, ItemId, OrderId};

    use super::*;

    fn order(invite_only: bool, privacy_mode: bool) -> Order {
        Order {
            id: OrderId::new(),
            vendor_name: "Cheese Cellar".to_owned(),
            vendor_url: "https://cheesecellar.example".to_owned(),
            deadline: Utc::now() + TimeDelta::days(2),
            creator_name: "Priya".to_owned(),
            creator_subject: None,
            invite_only,
            allow_oidc: false,
            privacy_mode,
            revision: 1,
            created_at: Utc::now(),
        }
    }

    fn guest(name: &str) -> Identity {
        Identity::new(
            Actor::Guest {
                name: name.to_owned(),
            },
            name,
        )
    }

    fn item_owned_by(viewer: &Identity, order_id: OrderId) -> Item {
        Item {
            id: ItemId::new(),
            order_id,
            owner: viewer.key(),
            owner_name: viewer.display_name.clone(),
            product_name: "Comté".to_owned(),
            product_sku: None,
            product_url: None,
            quantity: "1".to_owned(),
            note: None,
            added_at: Utc::now(),
        }
    }

    fn foreign_item(order_id: OrderId) -> Item {
        Item {
            id: ItemId::new(),
            order_id,
            owner: ActorKey::from("guest:Noor".to_owned()),
            owner_name: "Noor".to_owned(),
            product_name: "Gruyère".to_owned(),
            product_sku: None,
            product_url: None,
            quantity: "2".to_owned(),
            note: None,
            added_at: Utc::now(),
        }
    }

    #[test]
    fn test_item_events_visible_to_everyone_without_privacy() {
        let order = order(false, false);
        let viewer = guest("Sam");
        let event = OrderEvent::ItemAdded {
            item: foreign_item(order.id),
        };
        assert!(should_deliver(&event, &viewer, &order));
    }

    #[test]
    fn test_privacy_hides_foreign_items() {
        let order = order(true, true);
        let viewer = guest("Sam");
        let event = OrderEvent::ItemDeleted {
            item: foreign_item(order.id),
        };
        assert!(!should_deliver(&event, &viewer, &order));
    }

    #[test]
    fn test_privacy_keeps_own_items_visible() {
        let order = order(true, true);
        let viewer = guest("Sam");
        let event = OrderEvent::ItemUpdated {
            item: item_owned_by(&viewer, order.id),
        };
        assert!(should_deliver(&event, &viewer, &order));
    }

    #[test]
    fn test_admin_sees_foreign_items_under_privacy() {
        let order = order(true, true);
        let admin = guest("Sam").with_admin();
        let event = OrderEvent::ItemAdded {
            item: foreign_item(order.id),
        };
        assert!(should_deliver(&event, &admin, &order));
    }

    #[test]
    fn test_privacy_mode_alone_does_not_hide() {
        // Hiding requires the invite wall too; privacy_mode on an open
        // order has no effect.
        let order = order(false, true);
        let viewer = guest("Sam");
        let event = OrderEvent::ItemAdded {
            item: foreign_item(order.id),
        };
        assert!(should_deliver(&event, &viewer, &order));
    }

    #[test]
    fn test_order_scoped_events_always_delivered() {
        let order = order(true, true);
        let viewer = Identity::new(
            Actor::Anonymous {
                session: Uuid::new_v4(),
            },
            "Anonymous",
        );
        let deadline = OrderEvent::DeadlineChanged {
            deadline: Utc::now() + TimeDelta::days(9),
        };
        let invite = OrderEvent::InviteIssued {
            guest_name: "Noor".to_owned(),
        };
        assert!(should_deliver(&deadline, &viewer, &order));
        assert!(should_deliver(&invite, &viewer, &order));
    }
}
