//! Message texts and inline-button payloads.

use salon_engine::{
    Appointment, BlackoutSlot, CancellationOutcome, ChatMessage, DateLabel, EngineError, PaymentStatus, Status,
};
use std::fmt;
use teloxide::utils::html::escape as escape_html;

pub const WELCOME: &str = "✨ <b>Маникюр</b> ✨\n\n\
     Здравствуйте! 👋\n\
     Я помогу вам записаться на маникюр.\n\n\
     Нажмите кнопку ниже, чтобы выбрать удобные дату и время 💕";

pub const NOT_FOUND: &str = "Запись не найдена";

/// Room left for free text once headers are added; Telegram allows 4096
/// characters after entity parsing.
const MAX_BODY_CHARS: usize = 3800;

/// Inline button payload, `<kind>` or `<kind>:<id>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Callback {
    /// Client asks what cancelling would mean.
    Cancel(i64),
    /// Client accepted the cancellation terms.
    CancelAccepted(i64),
    Confirm(i64),
    AdminCancel(i64),
    Unblock(i64),
    /// Client starts a message to the provider.
    Write,
    /// Provider starts a reply to the client chat.
    Reply(i64),
    /// Drops a message being composed.
    Abort,
}

impl Callback {
    pub fn parse(data: &str) -> Option<Self> {
        match data {
            "write" => return Some(Callback::Write),
            "abort" => return Some(Callback::Abort),
            _ => {}
        }
        let (kind, id) = data.split_once(':')?;
        let id: i64 = id.parse().ok()?;
        match kind {
            "cancel" => Some(Callback::Cancel(id)),
            "cancel_ok" => Some(Callback::CancelAccepted(id)),
            "confirm" => Some(Callback::Confirm(id)),
            "admin_cancel" => Some(Callback::AdminCancel(id)),
            "unblock" => Some(Callback::Unblock(id)),
            "reply" => Some(Callback::Reply(id)),
            _ => None,
        }
    }

    pub fn is_admin_only(self) -> bool {
        matches!(
            self,
            Callback::Confirm(_) | Callback::AdminCancel(_) | Callback::Unblock(_) | Callback::Reply(_)
        )
    }
}

impl fmt::Display for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (kind, id) = match self {
            Callback::Cancel(id) => ("cancel", id),
            Callback::CancelAccepted(id) => ("cancel_ok", id),
            Callback::Confirm(id) => ("confirm", id),
            Callback::AdminCancel(id) => ("admin_cancel", id),
            Callback::Unblock(id) => ("unblock", id),
            Callback::Reply(id) => ("reply", id),
            Callback::Write => return f.write_str("write"),
            Callback::Abort => return f.write_str("abort"),
        };
        write!(f, "{}:{}", kind, id)
    }
}

/// Cuts raw text to [`MAX_BODY_CHARS`] before it is escaped.
fn trim_body(raw: &str) -> String {
    if raw.chars().count() <= MAX_BODY_CHARS {
        return raw.to_string();
    }
    let mut trimmed: String = raw.chars().take(MAX_BODY_CHARS - 1).collect();
    trimmed.push('…');
    trimmed
}

/// Appends a list entry unless the message would grow past the limit.
/// Markup only inflates the count, so the raw length is a safe bound.
fn push_entry(text: &mut String, entry: &str) -> bool {
    if text.chars().count() + entry.chars().count() > MAX_BODY_CHARS {
        text.push('…');
        return false;
    }
    text.push_str(entry);
    true
}

pub fn help(is_admin: bool) -> String {
    let mut text = "💕 <b>Бот для записи на маникюр</b>\n\n\
         /start — открыть приложение для записи\n\
         /mybookings — мои записи\n\
         /help — помощь"
        .to_string();

    if is_admin {
        text.push_str(
            "\n\n<b>🔧 Команды мастера:</b>\n\
             /today — записи на сегодня\n\
             /tomorrow — записи на завтра\n\
             /day Пн 02.03 — записи на дату\n\
             /all — все активные записи\n\
             /blocked — заблокированное время\n\
             /messages — сообщения клиентов\n\
             /broadcast текст — рассылка всем пользователям",
        );
    }
    text
}

fn status_icon(a: &Appointment) -> &'static str {
    match (a.status, a.payment_status) {
        (Status::Confirmed, _) | (_, PaymentStatus::Paid) => "✅",
        (Status::Pending, _) => "⏳",
        _ => "❌",
    }
}

pub fn client_list(appointments: &[Appointment]) -> String {
    let mut text = "📋 <b>Ваши записи:</b>\n\n".to_string();
    for a in appointments {
        text.push_str(&format!("{} {} в {}\n", status_icon(a), a.date_label, a.time_label));
    }
    text.push_str("\n⏳ — ожидает предоплаты, ✅ — подтверждена");
    text
}

pub fn day_report(title: &str, day: &DateLabel, appointments: &[Appointment]) -> String {
    if appointments.is_empty() {
        return format!("☀️ {} ({}) — записей нет, свободный день!", title, day);
    }

    let mut text = format!("📋 <b>{}</b> ({})\n\n", title, day);
    for (i, a) in appointments.iter().enumerate() {
        text.push_str(&format!(
            "{}. {} <b>{}</b>\n   👤 {} · 📱 {}\n\n",
            i + 1,
            status_icon(a),
            a.time_label,
            escape_html(&a.client_name),
            escape_html(&a.client_phone),
        ));
    }

    let unpaid = appointments
        .iter()
        .filter(|a| a.status == Status::Pending)
        .count();
    text.push_str(&format!(
        "━━━━━━━━━━━━━\n📊 Всего записей: <b>{}</b>, ожидают оплаты: <b>{}</b>",
        appointments.len(),
        unpaid,
    ));
    text
}

pub fn all_report(appointments: &[Appointment]) -> String {
    if appointments.is_empty() {
        return "📭 Активных записей нет".to_string();
    }

    let mut text = format!("📋 <b>Все активные записи</b> ({})\n\n", appointments.len());
    for a in appointments {
        let entry = format!(
            "{} <b>{} {}</b> · #{}\n   👤 {} · 📱 {}\n",
            status_icon(a),
            a.date_label,
            a.time_label,
            a.id,
            escape_html(&a.client_name),
            escape_html(&a.client_phone),
        );
        if !push_entry(&mut text, &entry) {
            break;
        }
    }
    text
}

pub fn blackout_when(slot: &BlackoutSlot) -> String {
    match &slot.time_label {
        Some(time) => format!("{} {}", slot.date_label, time),
        None => format!("{} (весь день)", slot.date_label),
    }
}

pub fn blackout_list(slots: &[BlackoutSlot]) -> String {
    if slots.is_empty() {
        return "🔓 Заблокированного времени нет".to_string();
    }

    let mut text = "🔒 <b>Заблокированное время:</b>\n\n".to_string();
    for slot in slots {
        text.push_str(&format!("• {}", blackout_when(slot)));
        if !slot.reason.is_empty() {
            text.push_str(&format!(" — {}", escape_html(&slot.reason)));
        }
        text.push('\n');
    }
    text
}

pub fn outcome(outcome: CancellationOutcome) -> &'static str {
    match outcome {
        CancellationOutcome::CancelImmediately => "Вы уверены, что хотите отменить запись?",
        CancellationOutcome::RequireDoubleConfirm => {
            "💰 <b>Условия отмены:</b>\n\
             При отмене записи менее чем за 24 часа предоплата не возвращается.\n\n\
             Вы уверены, что хотите отменить запись?"
        }
        CancellationOutcome::RequireProviderContact => {
            "💰 <b>Условия отмены:</b>\n\
             Для отмены записи и возврата предоплаты напишите мастеру."
        }
        CancellationOutcome::Refuse => "Эту запись уже нельзя отменить.",
    }
}

pub fn client_cancelled(a: &Appointment) -> String {
    format!(
        "❌ <b>Клиент отменил запись #{}</b>\n\n👤 {}\n📱 {}\n📅 {} в {}",
        a.id,
        escape_html(&a.client_name),
        escape_html(&a.client_phone),
        a.date_label,
        a.time_label,
    )
}

pub fn provider_cancelled(a: &Appointment) -> String {
    format!(
        "😔 Мастер отменил вашу запись на {} в {}.\n\nВыберите другое время 💕",
        a.date_label, a.time_label,
    )
}

pub fn confirmed(a: &Appointment) -> String {
    format!(
        "🎉 Оплата получена, запись подтверждена!\n\n📅 {}\n⏰ {}\n\nЖдём вас 💅",
        a.date_label, a.time_label,
    )
}

pub fn reminder(a: &Appointment) -> String {
    format!(
        "💕 Напоминание!\n\n\
         Завтра у вас запись на маникюр:\n\n\
         📅 {} в <b>{}</b>\n\n\
         Ждём вас! ✨",
        a.date_label, a.time_label,
    )
}

// ── Messaging ──

pub const WRITE_PROMPT: &str = "💬 <b>Написать мастеру</b>\n\n\
     Напишите сообщение, мастер ответит вам здесь же.";

pub const MESSAGE_SENT: &str = "✅ Сообщение отправлено мастеру. Ответ придёт сюда же.";

pub const NOTHING_TO_SEND: &str = "Чтобы написать мастеру, нажмите «✉️ Написать мастеру» 💕";

pub fn reply_prompt(client_name: &str, thread: &[ChatMessage]) -> String {
    let mut text = format!("💬 <b>Ответ клиенту</b> {}\n\n", escape_html(client_name));
    for m in thread {
        let who = if m.from_client { "👤" } else { "💅" };
        if !push_entry(&mut text, &format!("{} {}\n", who, escape_html(&m.body))) {
            text.push('\n');
            break;
        }
    }
    text.push_str("\nНапишите сообщение:");
    text
}

/// What the provider receives when a client writes.
pub fn client_message(m: &ChatMessage) -> String {
    format!(
        "💬 <b>Сообщение от клиента</b>\n\n👤 {}\n🆔 {}\n\n{}",
        escape_html(&m.client_name),
        m.client_chat_id,
        escape_html(&trim_body(&m.body)),
    )
}

pub fn provider_message(body: &str) -> String {
    format!("💬 <b>Сообщение от мастера:</b>\n\n{}", escape_html(&trim_body(body)))
}

pub fn broadcast(body: &str) -> String {
    format!("📢 <b>Сообщение от мастера:</b>\n\n{}", escape_html(&trim_body(body)))
}

pub fn broadcast_report(sent: usize, failed: usize) -> String {
    format!("📢 Рассылка завершена: доставлено {}, не доставлено {}", sent, failed)
}

pub fn inbox(messages: &[ChatMessage]) -> String {
    if messages.is_empty() {
        return "📭 Сообщений от клиентов нет".to_string();
    }

    let mut text = "💬 <b>Последние сообщения клиентов:</b>\n\n".to_string();
    for m in messages {
        let entry = format!(
            "👤 <b>{}</b> ({})\n{}\n📅 {}\n\n",
            escape_html(&m.client_name),
            m.client_chat_id,
            escape_html(&m.body),
            m.created_at,
        );
        if !push_entry(&mut text, &entry) {
            break;
        }
    }
    text
}

/// Reply for a failed engine call. Storage faults are logged, not shown.
pub fn engine_error(e: &EngineError) -> String {
    match e {
        EngineError::NotFound(_) => NOT_FOUND.to_string(),
        EngineError::BlackoutNotFound(_) => "Блокировка уже снята".to_string(),
        EngineError::InvalidTransition { from, .. } => match from {
            Status::Expired => "Запись уже отменена по истечении времени оплаты".to_string(),
            Status::Cancelled => "Запись уже отменена".to_string(),
            _ => "Действие недоступно для этой записи".to_string(),
        },
        EngineError::PreconditionFailed { .. } => {
            "Запись только что изменилась, попробуйте ещё раз".to_string()
        }
        EngineError::CancellationDenied(o) => outcome(*o).to_string(),
        e if e.is_recoverable() => e.to_string(),
        e => {
            tracing::error!("Engine failure: {}", e);
            "⚠️ Что-то пошло не так, попробуйте позже".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn appointment(status: Status) -> Appointment {
        Appointment {
            id: 7,
            client_name: "Анна <VIP>".into(),
            client_phone: "+79000000000".into(),
            date_label: "Пн 02.03".into(),
            time_label: "10:00".into(),
            status,
            payment_status: match status {
                Status::Confirmed => PaymentStatus::Paid,
                _ => PaymentStatus::NotPaid,
            },
            created_at: "2026-03-01 12:00:00".into(),
            confirmed_at: None,
            cancelled_at: None,
            client_ref: 42,
            reminder_sent: false,
        }
    }

    #[test]
    fn test_callback_payloads() {
        for callback in [
            Callback::Cancel(1),
            Callback::CancelAccepted(2),
            Callback::Confirm(3),
            Callback::AdminCancel(4),
            Callback::Unblock(5),
            Callback::Reply(6),
            Callback::Write,
            Callback::Abort,
        ] {
            assert_eq!(Callback::parse(&callback.to_string()), Some(callback));
        }
        assert_eq!(Callback::Cancel(12).to_string(), "cancel:12");
        assert_eq!(Callback::Write.to_string(), "write");
    }

    #[test]
    fn test_callback_rejects_garbage() {
        assert_eq!(Callback::parse("cancel:"), None);
        assert_eq!(Callback::parse("cancel:abc"), None);
        assert_eq!(Callback::parse("pay:1"), None);
        assert_eq!(Callback::parse("confirm"), None);
        assert_eq!(Callback::parse("write:1"), None);
    }

    #[test]
    fn test_admin_only_callbacks() {
        assert!(!Callback::Cancel(1).is_admin_only());
        assert!(!Callback::CancelAccepted(1).is_admin_only());
        assert!(Callback::Confirm(1).is_admin_only());
        assert!(Callback::AdminCancel(1).is_admin_only());
        assert!(Callback::Unblock(1).is_admin_only());
        assert!(Callback::Reply(1).is_admin_only());
        assert!(!Callback::Write.is_admin_only());
        assert!(!Callback::Abort.is_admin_only());
    }

    #[test]
    fn test_day_report_counts_unpaid() {
        let day = DateLabel::parse("Пн 02.03").unwrap();
        let text = day_report(
            "Завтра",
            &day,
            &[appointment(Status::Pending), appointment(Status::Confirmed)],
        );
        assert!(text.contains("Всего записей: <b>2</b>, ожидают оплаты: <b>1</b>"));
        assert!(text.contains("Анна &lt;VIP&gt;"));
    }

    #[test]
    fn test_empty_day_report() {
        let day = DateLabel::parse("Пн 02.03").unwrap();
        assert_eq!(
            day_report("Сегодня", &day, &[]),
            "☀️ Сегодня (Пн 02.03) — записей нет, свободный день!"
        );
    }

    #[test]
    fn test_blackout_list() {
        let slot = |id, time: Option<&str>, reason: &str| BlackoutSlot {
            id,
            date_label: "Вт 03.03".into(),
            time_label: time.map(String::from),
            reason: reason.into(),
            appointment_id: None,
            created_at: "2026-03-01 12:00:00".into(),
        };
        let text = blackout_list(&[slot(1, None, "Отпуск"), slot(2, Some("15:00"), "")]);
        assert!(text.contains("• Вт 03.03 (весь день) — Отпуск\n"));
        assert!(text.contains("• Вт 03.03 15:00\n"));
        assert_eq!(blackout_list(&[]), "🔓 Заблокированного времени нет");
    }

    #[test]
    fn test_error_replies() {
        assert_eq!(engine_error(&EngineError::NotFound(3)), NOT_FOUND);
        let expired = EngineError::InvalidTransition {
            from: Status::Expired,
            action: salon_engine::Action::ClientCancel,
        };
        assert_eq!(
            engine_error(&expired),
            "Запись уже отменена по истечении времени оплаты"
        );
        let denied = EngineError::CancellationDenied(CancellationOutcome::RequireProviderContact);
        assert_eq!(
            engine_error(&denied),
            outcome(CancellationOutcome::RequireProviderContact)
        );
    }

    #[test]
    fn test_help_lists_admin_commands_for_admin_only() {
        assert!(!help(false).contains("/blocked"));
        assert!(help(true).contains("/blocked"));
    }

    fn message(body: &str, from_client: bool) -> ChatMessage {
        ChatMessage {
            id: 1,
            client_chat_id: 42,
            client_name: "Анна <VIP>".into(),
            body: body.into(),
            from_client,
            created_at: "2026-03-01 12:00:00".into(),
        }
    }

    #[test]
    fn test_relayed_messages_are_escaped() {
        let text = client_message(&message("1 < 2 & 3", true));
        assert!(text.contains("👤 Анна &lt;VIP&gt;"));
        assert!(text.contains("🆔 42"));
        assert!(text.ends_with("1 &lt; 2 &amp; 3"));
        assert!(provider_message("<b>").ends_with("&lt;b&gt;"));
        assert!(broadcast("a & b").ends_with("a &amp; b"));
    }

    #[test]
    fn test_reply_prompt_shows_thread() {
        let text = reply_prompt("Анна", &[message("Можно позже?", true), message("Да", false)]);
        assert!(text.contains("👤 Можно позже?\n💅 Да\n"));
        assert!(text.ends_with("Напишите сообщение:"));
    }

    #[test]
    fn test_all_report_lists_every_date() {
        let mut other = appointment(Status::Confirmed);
        other.id = 8;
        other.date_label = "Вт 03.03".into();
        let text = all_report(&[appointment(Status::Pending), other]);
        assert!(text.contains("(2)"));
        assert!(text.contains("⏳ <b>Пн 02.03 10:00</b> · #7"));
        assert!(text.contains("✅ <b>Вт 03.03 10:00</b> · #8"));
        assert_eq!(all_report(&[]), "📭 Активных записей нет");
    }

    #[test]
    fn test_long_texts_stay_under_telegram_limit() {
        let body = "я".repeat(5000);
        let text = provider_message(&body);
        assert!(text.chars().count() < 4096);
        assert!(text.ends_with('…'));

        let many: Vec<ChatMessage> = (0..200).map(|_| message(&"я".repeat(100), true)).collect();
        let listing = inbox(&many);
        assert!(listing.chars().count() <= MAX_BODY_CHARS + 1);
        assert!(listing.ends_with('…'));
        // Entries are never cut through their markup.
        assert_eq!(listing.matches("<b>").count(), listing.matches("</b>").count());
    }
}
