//! Who may see and change which appointments.
//!
//! Identity comes from outside: the caller authenticates and hands in a
//! [`Requester`]. Admins see and manage everything; members see and manage
//! only the bookings they own.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::model::{Appointment, AppointmentDraft, Status};

/// Calendar title shown to members for other people's bookings.
pub const MASKED_TITLE: &str = "【予約　有り】";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Member,
}

/// Profile of the signed-in account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: Ulid,
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

impl Account {
    pub fn new(id: Ulid) -> Self {
        Self {
            id,
            name: None,
            email: None,
            phone: None,
        }
    }

    /// Name used when a booking form leaves it blank: the profile name, or
    /// the local part of the e-mail address.
    pub fn display_name(&self) -> Option<String> {
        self.name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .or_else(|| {
                self.email
                    .as_deref()
                    .and_then(|e| e.split('@').next())
                    .filter(|local| !local.is_empty())
                    .map(str::to_string)
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requester {
    pub account: Account,
    pub role: Role,
}

impl Requester {
    pub fn admin(account: Account) -> Self {
        Self {
            account,
            role: Role::Admin,
        }
    }

    pub fn member(account: Account) -> Self {
        Self {
            account,
            role: Role::Member,
        }
    }

    pub fn id(&self) -> Ulid {
        self.account.id
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn owns(&self, appointment: &Appointment) -> bool {
        appointment.owner_id == Some(self.account.id)
    }

    pub fn can_view(&self, appointment: &Appointment) -> bool {
        self.is_admin() || self.owns(appointment)
    }

    pub fn can_edit(&self, appointment: &Appointment) -> bool {
        self.is_admin() || self.owns(appointment)
    }

    pub fn can_delete(&self, appointment: &Appointment) -> bool {
        self.is_admin() || self.owns(appointment)
    }

    /// Admins set any status; owners may only cancel.
    pub fn can_set_status(&self, appointment: &Appointment, status: Status) -> bool {
        self.is_admin() || (self.owns(appointment) && status == Status::Cancelled)
    }

    /// Whether the calendar hides this booking's details from the requester.
    pub fn masks(&self, appointment: &Appointment) -> bool {
        !self.can_view(appointment)
    }

    /// Records the requester is allowed to list.
    pub fn visible<'a>(
        &'a self,
        appointments: &'a [Appointment],
    ) -> impl Iterator<Item = &'a Appointment> + 'a {
        appointments.iter().filter(|a| self.can_view(a))
    }

    /// Fill blank contact fields of a member's own booking from the account.
    pub fn fill_contact(&self, draft: &mut AppointmentDraft) {
        if is_blank(&draft.customer_name) {
            draft.customer_name = self.account.display_name();
        }
        if is_blank(&draft.customer_email) {
            draft.customer_email = self.account.email.clone();
        }
        if is_blank(&draft.customer_phone) {
            draft.customer_phone = self.account.phone.clone();
        }
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().is_none_or(|v| v.trim().is_empty())
}
