use serde::Serialize;

/// Callback data carried by the ordering control.
pub const ORDER_TOKEN: &str = "order";
pub const ORDER_BUTTON_LABEL: &str = "🛒 Замовити";

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct InlineKeyboardButton {
    pub text: String,
    pub callback_data: String,
}

impl InlineKeyboardButton {
    pub fn callback(text: impl Into<String>, callback_data: impl Into<String>) -> Self {
        Self { text: text.into(), callback_data: callback_data.into() }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct InlineKeyboardMarkup {
    pub inline_keyboard: Vec<Vec<InlineKeyboardButton>>,
}

impl InlineKeyboardMarkup {
    pub fn buttons(&self) -> impl Iterator<Item = &InlineKeyboardButton> {
        self.inline_keyboard.iter().flatten()
    }
}

#[derive(Default)]
pub struct KeyboardBuilder {
    rows: Vec<Vec<InlineKeyboardButton>>,
}

impl KeyboardBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn row(mut self, buttons: Vec<InlineKeyboardButton>) -> Self {
        if !buttons.is_empty() {
            self.rows.push(buttons);
        }
        self
    }

    pub fn build(self) -> InlineKeyboardMarkup {
        InlineKeyboardMarkup { inline_keyboard: self.rows }
    }
}

/// Single-button keyboard attached to every broadcast post.
pub fn order_keyboard() -> InlineKeyboardMarkup {
    KeyboardBuilder::new()
        .row(vec![InlineKeyboardButton::callback(ORDER_BUTTON_LABEL, ORDER_TOKEN)])
        .build()
}
