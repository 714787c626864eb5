use chrono::NaiveDateTime;
use serde::Serialize;
use uuid::Uuid;

use medtime_db::models::{MedicationRow, ReminderRow};
use medtime_types::events::GatewayEvent;

/// Payload handed to every channel sender.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum Notification {
    /// A dose is due.
    MedicationReminder {
        reminder_id: Uuid,
        medication_id: Uuid,
        medication_name: String,
        title: String,
        body: String,
        scheduled_for: NaiveDateTime,
        low_stock: bool,
    },

    /// Reply to a "mark as taken" action that changed the reminder.
    DoseConfirmed {
        reminder_id: Uuid,
        medication_name: String,
        /// Local time the dose was recorded
        taken_at: NaiveDateTime,
    },

    /// Reply to a "mark as taken" action on a dose that was already recorded.
    AlreadyTaken {
        reminder_id: Uuid,
        medication_name: String,
    },
}

impl Notification {
    pub fn reminder(
        reminder: &ReminderRow,
        medication: &MedicationRow,
        low_stock_threshold: f64,
    ) -> Self {
        let low_stock = medication.remaining_quantity <= low_stock_threshold;

        let mut body = format!(
            "Dose: {} {}\nTime: {}",
            fmt_quantity(medication.dosage_quantity),
            medication.unit,
            reminder.scheduled_for.format("%H:%M on %d/%m"),
        );
        if let Some(description) = medication.description.as_deref().filter(|d| !d.is_empty()) {
            body.push('\n');
            body.push_str(description);
        }
        if low_stock {
            body.push_str(&format!(
                "\n⚠️ Low stock: {} {} left",
                fmt_quantity(medication.remaining_quantity.max(0.0)),
                medication.unit
            ));
        }

        Self::MedicationReminder {
            reminder_id: reminder.id,
            medication_id: medication.id,
            medication_name: medication.name.clone(),
            title: format!("{}: time for your medication", medication.name),
            body,
            scheduled_for: reminder.scheduled_for,
            low_stock,
        }
    }

    pub fn title(&self) -> String {
        match self {
            Self::MedicationReminder { title, .. } => title.clone(),
            Self::DoseConfirmed { .. } => "Dose recorded".to_string(),
            Self::AlreadyTaken { .. } => "Already recorded".to_string(),
        }
    }

    pub fn body(&self) -> String {
        match self {
            Self::MedicationReminder { body, .. } => body.clone(),
            Self::DoseConfirmed {
                medication_name,
                taken_at,
                ..
            } => format!(
                "✅ {} marked as taken at {}",
                medication_name,
                taken_at.format("%H:%M")
            ),
            Self::AlreadyTaken {
                medication_name, ..
            } => format!("ℹ️ {} was already marked as taken", medication_name),
        }
    }

    pub fn reminder_id(&self) -> Uuid {
        match self {
            Self::MedicationReminder { reminder_id, .. }
            | Self::DoseConfirmed { reminder_id, .. }
            | Self::AlreadyTaken { reminder_id, .. } => *reminder_id,
        }
    }

    /// Whether chat senders should attach the "mark as taken" action.
    pub fn wants_taken_action(&self) -> bool {
        matches!(self, Self::MedicationReminder { .. })
    }

    /// Realtime socket form. Only reminders travel over the gateway.
    pub fn to_gateway_event(&self) -> Option<GatewayEvent> {
        match self {
            Self::MedicationReminder {
                reminder_id,
                medication_id,
                title,
                body,
                scheduled_for,
                low_stock,
                ..
            } => Some(GatewayEvent::MedicationReminder {
                reminder_id: *reminder_id,
                medication_id: *medication_id,
                title: title.clone(),
                body: body.clone(),
                scheduled_for: *scheduled_for,
                low_stock: *low_stock,
            }),
            _ => None,
        }
    }
}

/// "2" rather than "2.0", but keeps "2.5".
pub fn fmt_quantity(q: f64) -> String {
    if q.fract() == 0.0 {
        format!("{:.0}", q)
    } else {
        format!("{}", q)
    }
}
