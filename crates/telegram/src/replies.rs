//! Customer and operator facing texts.

use orderdesk_core::domain::order::OrderRecord;

pub const GREETING: &str = "Бот працює!";
pub const QUANTITY_PROMPT: &str = "Введіть, будь ласка, кількість товару:";
pub const PHONE_PROMPT: &str = "Вкажіть, будь ласка, номер телефону для зв'язку:";
pub const ORDER_CONFIRMATION: &str = "✅ Дякуємо! Ваше замовлення прийнято.";
pub const CANCEL_CONFIRMATION: &str = "Замовлення скасовано.";

/// Sent to the post's chat when the customer has never opened the bot.
pub const OPEN_BOT_FIRST: &str =
    "Щоб оформити замовлення, спершу напишіть боту /start в особисті повідомлення, а потім натисніть кнопку ще раз.";

pub fn operator_notification(order: &OrderRecord) -> String {
    format!("🆕 Нове замовлення\n{}", order_details(order))
}

/// The ledger may or may not hold this order; the operator checks by hand.
pub fn operator_unconfirmed_alert(order: &OrderRecord) -> String {
    format!(
        "⚠️ Замовлення не підтверджено таблицею\n\
         Перевірте, чи з'явився рядок, перш ніж додавати його вручну.\n{}",
        order_details(order)
    )
}

fn order_details(order: &OrderRecord) -> String {
    format!(
        "Товар: {product}\n\
         Кількість: {quantity}\n\
         Телефон: {phone}\n\
         Клієнт: {user_name} (id {user_id})\n\
         Час: {submitted_at} UTC",
        product = order.product_descriptor,
        quantity = order.quantity,
        phone = order.phone,
        user_name = order.user_name,
        user_id = order.user_id,
        submitted_at = order.submitted_at,
    )
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use orderdesk_core::domain::order::{OrderRecord, Sender, UserId};
    use orderdesk_core::domain::session::Session;

    use super::{operator_notification, operator_unconfirmed_alert};

    #[test]
    fn operator_notification_lists_every_order_field() {
        let now = Utc.with_ymd_and_hms(2026, 5, 2, 12, 0, 5).unwrap();
        let mut session = Session::open(UserId(501), "Торт Наполеон", now);
        session.quantity = Some("2".to_owned());
        session.phone = Some("+380501234567".to_owned());
        let order = OrderRecord::from_session(&session, &Sender::new(501, "Олена"), now)
            .expect("complete session");

        let text = operator_notification(&order);

        assert!(text.contains("Товар: Торт Наполеон"));
        assert!(text.contains("Кількість: 2"));
        assert!(text.contains("Телефон: +380501234567"));
        assert!(text.contains("Клієнт: Олена (id 501)"));
        assert!(text.starts_with("🆕 Нове замовлення\nТовар:"));
        assert!(text.ends_with("2026-05-02 12:00:05 UTC"));

        let alert = operator_unconfirmed_alert(&order);
        assert!(alert.starts_with("⚠️"));
        assert!(alert.contains("Телефон: +380501234567"));
        assert!(alert.ends_with("2026-05-02 12:00:05 UTC"));
    }
}
