//! Delivers engine events as Telegram messages.

use salon_engine::{Appointment, Canceller, EngineEvent};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::telegram::{escape_html, TelegramClient};

pub struct Notifier {
    telegram: TelegramClient,
    admin_chat: i64,
    payment_window_minutes: i64,
}

impl Notifier {
    pub fn new(telegram: TelegramClient, admin_chat: i64, payment_window_minutes: i64) -> Self {
        Self {
            telegram,
            admin_chat,
            payment_window_minutes,
        }
    }

    /// Drains the event channel until every sender is gone.
    pub async fn run(self, mut events: UnboundedReceiver<EngineEvent>) {
        while let Some(event) = events.recv().await {
            for (chat_id, text) in self.render(&event) {
                if let Err(e) = self.telegram.send_message(chat_id, &text).await {
                    // Clients may have blocked the bot; nothing to retry.
                    tracing::warn!("Failed to notify chat {}: {}", chat_id, e);
                }
            }
        }
        tracing::info!("Event channel closed, notifier stopped");
    }

    /// Messages for one event as (chat, text) pairs.
    fn render(&self, event: &EngineEvent) -> Vec<(i64, String)> {
        match event {
            EngineEvent::NewBooking(a) => vec![
                (
                    self.admin_chat,
                    format!(
                        "\u{1f4cb} <b>Новая запись #{}</b>\n\n{}\n\u{1f4b3} Ожидает предоплаты",
                        a.id,
                        details(a)
                    ),
                ),
                (
                    a.client_ref,
                    format!(
                        "\u{2705} Время забронировано!\n\n\u{1f4c5} {}\n\u{23f0} {}\n\n\
                         Внесите предоплату в течение {} минут, иначе запись будет отменена.",
                        a.date_label, a.time_label, self.payment_window_minutes
                    ),
                ),
            ],
            EngineEvent::ExpiredHold(a) => vec![
                (
                    a.client_ref,
                    format!(
                        "\u{23f0} Время оплаты истекло, запись на {} {} отменена.\n\n\
                         Вы можете записаться снова.",
                        a.date_label, a.time_label
                    ),
                ),
                (
                    self.admin_chat,
                    format!(
                        "\u{23f0} <b>Автоматическая отмена записи #{}</b>\n\n{}\n\u{1f4b3} Истекло время оплаты",
                        a.id,
                        details(a)
                    ),
                ),
            ],
            EngineEvent::Confirmed(a) => vec![(
                a.client_ref,
                format!(
                    "\u{1f389} Оплата получена, запись подтверждена!\n\n\u{1f4c5} {}\n\u{23f0} {}\n\nЖдём вас \u{1f485}",
                    a.date_label, a.time_label
                ),
            )],
            EngineEvent::Cancelled {
                appointment: a,
                by: Canceller::Admin,
            } => vec![(
                a.client_ref,
                format!(
                    "\u{26a0}\u{fe0f} Мастер отменил вашу запись:\n\u{1f4c5} {}\n\u{23f0} {}\n\n\
                     Для уточнения деталей напишите мастеру.",
                    a.date_label, a.time_label
                ),
            )],
            EngineEvent::Cancelled {
                appointment: a,
                by: Canceller::Client,
            } => vec![
                (
                    self.admin_chat,
                    format!("\u{274c} <b>Клиент отменил запись #{}</b>\n\n{}", a.id, details(a)),
                ),
                (
                    a.client_ref,
                    format!(
                        "Ваша запись отменена:\n\u{1f4c5} {}\n\u{23f0} {}",
                        a.date_label, a.time_label
                    ),
                ),
            ],
        }
    }
}

fn details(a: &Appointment) -> String {
    format!(
        "\u{1f464} {}\n\u{1f4de} {}\n\u{1f4c5} {}\n\u{23f0} {}",
        escape_html(&a.client_name),
        escape_html(&a.client_phone),
        a.date_label,
        a.time_label
    )
}
