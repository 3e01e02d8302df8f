//! Regatta sail declarations.
//!
//! A [`DeclarationSession`] holds the form state for one boat: contact fields
//! plus five sail slots. Each slot offers the hull's certificates of the right
//! sail type, newest first, minus whatever another slot already holds, so a
//! certificate can never be declared twice.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{Config, SailTypeCodes};
use crate::records::RecordStore;
use crate::{SailError, SailRecord};

pub const RULE_HULL_REQUIRED: &str = "Hull number is required";
pub const RULE_OWNER_REQUIRED: &str = "Owner name is required";
pub const RULE_SAIL_REQUIRED: &str = "At least one sail must be selected";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SailKind {
    Jib,
    Spinnaker,
    Main,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Slot {
    Jib1,
    Jib2,
    Main,
    Spinnaker1,
    Spinnaker2,
}

impl Slot {
    /// Print order.
    pub const ALL: [Slot; 5] = [
        Slot::Jib1,
        Slot::Jib2,
        Slot::Main,
        Slot::Spinnaker1,
        Slot::Spinnaker2,
    ];

    pub fn id(self) -> &'static str {
        match self {
            Slot::Jib1 => "jib1",
            Slot::Jib2 => "jib2",
            Slot::Main => "main",
            Slot::Spinnaker1 => "spinnaker1",
            Slot::Spinnaker2 => "spinnaker2",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Slot::Jib1 => "Jib 1",
            Slot::Jib2 => "Jib 2",
            Slot::Main => "Main",
            Slot::Spinnaker1 => "Spinnaker 1",
            Slot::Spinnaker2 => "Spinnaker 2",
        }
    }

    pub fn kind(self) -> SailKind {
        match self {
            Slot::Jib1 | Slot::Jib2 => SailKind::Jib,
            Slot::Main => SailKind::Main,
            Slot::Spinnaker1 | Slot::Spinnaker2 => SailKind::Spinnaker,
        }
    }

    pub fn from_id(id: &str) -> Option<Slot> {
        Slot::ALL.into_iter().find(|slot| slot.id() == id)
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Certificate per slot; an empty string is an empty slot.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlotAssignments {
    #[serde(rename = "jib1Cert")]
    jib1: String,
    #[serde(rename = "jib2Cert")]
    jib2: String,
    #[serde(rename = "mainCert")]
    main: String,
    #[serde(rename = "spinnaker1Cert")]
    spinnaker1: String,
    #[serde(rename = "spinnaker2Cert")]
    spinnaker2: String,
}

impl SlotAssignments {
    fn field(&self, slot: Slot) -> &String {
        match slot {
            Slot::Jib1 => &self.jib1,
            Slot::Jib2 => &self.jib2,
            Slot::Main => &self.main,
            Slot::Spinnaker1 => &self.spinnaker1,
            Slot::Spinnaker2 => &self.spinnaker2,
        }
    }

    fn field_mut(&mut self, slot: Slot) -> &mut String {
        match slot {
            Slot::Jib1 => &mut self.jib1,
            Slot::Jib2 => &mut self.jib2,
            Slot::Main => &mut self.main,
            Slot::Spinnaker1 => &mut self.spinnaker1,
            Slot::Spinnaker2 => &mut self.spinnaker2,
        }
    }

    pub fn get(&self, slot: Slot) -> Option<&str> {
        let value = self.field(slot);
        if value.is_empty() {
            None
        } else {
            Some(value.as_str())
        }
    }

    pub(crate) fn set(&mut self, slot: Slot, certificate: Option<&str>) {
        *self.field_mut(slot) = certificate.map(str::trim).unwrap_or_default().to_string();
    }

    pub(crate) fn clear(&mut self) {
        *self = SlotAssignments::default();
    }

    pub fn iter(&self) -> impl Iterator<Item = (Slot, Option<&str>)> + '_ {
        Slot::ALL.into_iter().map(move |slot| (slot, self.get(slot)))
    }

    /// Union of the non-empty slot values.
    pub fn selected(&self) -> BTreeSet<String> {
        self.iter()
            .filter_map(|(_, cert)| cert.map(str::to_string))
            .collect()
    }

    pub fn filled(&self) -> usize {
        self.iter().filter(|(_, cert)| cert.is_some()).count()
    }

    pub fn holder_of(&self, certificate: &str) -> Option<Slot> {
        self.iter()
            .find(|(_, cert)| *cert == Some(certificate))
            .map(|(slot, _)| slot)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextField {
    Owner,
    BoatName,
    Email,
    Mobile,
    Spinnaker1Color,
    Spinnaker2Color,
}

impl TextField {
    pub const ALL: [TextField; 6] = [
        TextField::Owner,
        TextField::BoatName,
        TextField::Email,
        TextField::Mobile,
        TextField::Spinnaker1Color,
        TextField::Spinnaker2Color,
    ];

    pub fn id(self) -> &'static str {
        match self {
            TextField::Owner => "owner",
            TextField::BoatName => "boatName",
            TextField::Email => "email",
            TextField::Mobile => "mobile",
            TextField::Spinnaker1Color => "spinnaker1Color",
            TextField::Spinnaker2Color => "spinnaker2Color",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            TextField::Owner => "Owner",
            TextField::BoatName => "Boat Name",
            TextField::Email => "Email",
            TextField::Mobile => "Mobile",
            TextField::Spinnaker1Color => "Spinnaker 1 Color",
            TextField::Spinnaker2Color => "Spinnaker 2 Color",
        }
    }
}

/// One boat's declaration, laid out the way it is persisted.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DeclarationRecord {
    pub hull_number: String,
    pub owner: String,
    pub boat_name: String,
    pub email: String,
    pub mobile: String,
    #[serde(flatten)]
    pub slots: SlotAssignments,
    pub spinnaker1_color: String,
    pub spinnaker2_color: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub saved_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl DeclarationRecord {
    pub fn text(&self, field: TextField) -> &str {
        match field {
            TextField::Owner => &self.owner,
            TextField::BoatName => &self.boat_name,
            TextField::Email => &self.email,
            TextField::Mobile => &self.mobile,
            TextField::Spinnaker1Color => &self.spinnaker1_color,
            TextField::Spinnaker2Color => &self.spinnaker2_color,
        }
    }

    fn text_mut(&mut self, field: TextField) -> &mut String {
        match field {
            TextField::Owner => &mut self.owner,
            TextField::BoatName => &mut self.boat_name,
            TextField::Email => &mut self.email,
            TextField::Mobile => &mut self.mobile,
            TextField::Spinnaker1Color => &mut self.spinnaker1_color,
            TextField::Spinnaker2Color => &mut self.spinnaker2_color,
        }
    }

    /// Colour/description column; only spinnakers carry one.
    pub fn colour_for(&self, slot: Slot) -> Option<&str> {
        let value = match slot {
            Slot::Spinnaker1 => &self.spinnaker1_color,
            Slot::Spinnaker2 => &self.spinnaker2_color,
            _ => return None,
        };
        if value.is_empty() {
            None
        } else {
            Some(value.as_str())
        }
    }

    /// The user-entered part of the record, without save metadata.
    pub fn without_metadata(&self) -> DeclarationRecord {
        DeclarationRecord {
            saved_at: None,
            version: None,
            ..self.clone()
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HullOutcome {
    /// Hull number was blank; the form was cleared.
    Cleared,
    NoRecords { hull: String },
    Loaded { hull: String, sails: usize },
}

impl HullOutcome {
    pub fn warning(&self) -> Option<String> {
        match self {
            HullOutcome::NoRecords { hull } => {
                Some(format!("No sails found for hull number {hull}"))
            }
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct DeclarationSession {
    store: Arc<RecordStore>,
    codes: SailTypeCodes,
    record: DeclarationRecord,
    hull_records: Vec<SailRecord>,
    selected: BTreeSet<String>,
    candidates: BTreeMap<Slot, Vec<usize>>,
}

impl DeclarationSession {
    pub fn new(store: Arc<RecordStore>, config: &Config) -> Self {
        Self {
            store,
            codes: config.sail_types.clone(),
            record: DeclarationRecord::default(),
            hull_records: Vec::new(),
            selected: BTreeSet::new(),
            candidates: BTreeMap::new(),
        }
    }

    pub fn record(&self) -> &DeclarationRecord {
        &self.record
    }

    pub fn hull(&self) -> &str {
        &self.record.hull_number
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    /// The current hull's records, most recent delivery first.
    pub fn hull_records(&self) -> &[SailRecord] {
        &self.hull_records
    }

    pub fn selected(&self) -> &BTreeSet<String> {
        &self.selected
    }

    pub fn set_text(&mut self, field: TextField, value: impl Into<String>) {
        *self.record.text_mut(field) = value.into();
    }

    /// Switch the form to another hull.
    ///
    /// Slot values that the new hull still owns (same certificate, matching
    /// sail type) are kept; everything else is dropped.
    pub fn set_hull(&mut self, hull: &str) -> HullOutcome {
        let hull = hull.trim();
        self.record.hull_number = hull.to_string();
        if hull.is_empty() {
            self.clear_all();
            return HullOutcome::Cleared;
        }

        let mut sails: Vec<SailRecord> = self.store.for_hull(hull).cloned().collect();
        if sails.is_empty() {
            warn!(hull, "no sails found for hull");
            self.clear_all();
            return HullOutcome::NoRecords {
                hull: hull.to_string(),
            };
        }
        sort_most_recent_first(&mut sails);

        if let Some(latest) = sails.first() {
            if !latest.purchaser.is_empty() {
                self.record.owner = latest.purchaser.clone();
            }
        }
        self.record.boat_name.clear();

        let count = sails.len();
        self.hull_records = sails;
        self.retain_owned_slots();
        self.refresh();
        debug!(hull, sails = count, "hull loaded");
        HullOutcome::Loaded {
            hull: hull.to_string(),
            sails: count,
        }
    }

    /// Assign `certificate` to `slot`, or empty the slot with `None`/blank.
    pub fn select_slot(&mut self, slot: Slot, certificate: Option<&str>) -> Result<(), SailError> {
        let certificate = certificate.map(str::trim).filter(|c| !c.is_empty());
        if let Some(cert) = certificate {
            if !self.is_candidate(slot, cert) {
                return Err(SailError::InvalidSelection {
                    slot,
                    certificate: cert.to_string(),
                });
            }
        }
        self.record.slots.set(slot, certificate);
        self.refresh();
        debug!(slot = slot.id(), certificate = certificate.unwrap_or(""), "slot updated");
        Ok(())
    }

    pub fn clear(&mut self) {
        self.record.slots.clear();
        self.refresh();
    }

    pub fn candidates(&self, slot: Slot) -> Vec<&SailRecord> {
        self.candidates
            .get(&slot)
            .map(|idx| idx.iter().map(|&i| &self.hull_records[i]).collect())
            .unwrap_or_default()
    }

    pub fn is_candidate(&self, slot: Slot, certificate: &str) -> bool {
        self.candidates(slot)
            .iter()
            .any(|r| r.certificate_no == certificate)
    }

    /// Registry record for the certificate currently in `slot`.
    pub fn slot_record(&self, slot: Slot) -> Option<&SailRecord> {
        self.record
            .slots
            .get(slot)
            .and_then(|cert| self.store.by_certificate(cert))
    }

    pub fn validation_errors(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.record.hull_number.trim().is_empty() {
            errors.push(RULE_HULL_REQUIRED.to_string());
        }
        if self.record.owner.trim().is_empty() {
            errors.push(RULE_OWNER_REQUIRED.to_string());
        }
        if self.record.slots.filled() == 0 {
            errors.push(RULE_SAIL_REQUIRED.to_string());
        }
        errors
    }

    pub fn validate(&self) -> Result<(), SailError> {
        let errors = self.validation_errors();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(SailError::Validation(errors))
        }
    }

    /// Load a saved declaration into the form. Returns the hull outcome and
    /// any saved slots whose certificate is no longer available.
    pub fn restore(&mut self, saved: &DeclarationRecord) -> (HullOutcome, Vec<Slot>) {
        let outcome = self.restore_fields(saved);
        let skipped = self.restore_slots(saved);
        (outcome, skipped)
    }

    /// First half of [`restore`](Self::restore): hull and text fields.
    pub fn restore_fields(&mut self, saved: &DeclarationRecord) -> HullOutcome {
        let outcome = self.set_hull(&saved.hull_number);
        for field in TextField::ALL {
            let value = saved.text(field);
            if !value.is_empty() {
                self.set_text(field, value);
            }
        }
        outcome
    }

    /// Second half of [`restore`](Self::restore): re-apply saved certificates.
    pub fn restore_slots(&mut self, saved: &DeclarationRecord) -> Vec<Slot> {
        self.clear();
        let mut skipped = Vec::new();
        for (slot, cert) in saved.slots.iter() {
            if let Some(cert) = cert {
                if let Err(err) = self.select_slot(slot, Some(cert)) {
                    warn!("skipping saved selection: {err}");
                    skipped.push(slot);
                }
            }
        }
        skipped
    }

    fn clear_all(&mut self) {
        self.record.owner.clear();
        self.record.boat_name.clear();
        self.record.email.clear();
        self.record.mobile.clear();
        self.record.slots.clear();
        self.hull_records.clear();
        self.selected.clear();
        self.candidates.clear();
    }

    fn retain_owned_slots(&mut self) {
        for slot in Slot::ALL {
            let Some(cert) = self.record.slots.get(slot) else {
                continue;
            };
            let code = self.codes.code_for(slot.kind());
            let owned = self
                .hull_records
                .iter()
                .any(|r| r.sail_type == code && r.certificate_no == cert);
            if !owned {
                self.record.slots.set(slot, None);
            }
        }
    }

    // Selected set and candidate lists are rebuilt from the slot values every
    // time; nothing is patched incrementally.
    fn refresh(&mut self) {
        self.selected = self.record.slots.selected();
        let mut candidates = BTreeMap::new();
        for slot in Slot::ALL {
            let code = self.codes.code_for(slot.kind());
            let own = self.record.slots.get(slot);
            let mut seen: BTreeSet<&str> = BTreeSet::new();
            let mut list = Vec::new();
            for (i, r) in self.hull_records.iter().enumerate() {
                if r.sail_type != code || r.certificate_no.is_empty() {
                    continue;
                }
                let cert = r.certificate_no.as_str();
                let held_elsewhere = own != Some(cert) && self.selected.contains(cert);
                // Duplicate certificates keep only the most recent record.
                if held_elsewhere || !seen.insert(cert) {
                    continue;
                }
                list.push(i);
            }
            candidates.insert(slot, list);
        }
        self.candidates = candidates;
    }
}

/// Newest delivery first; undated records sink to the bottom.
fn sort_most_recent_first(records: &mut [SailRecord]) {
    records.sort_by(|a, b| match (a.delivered_on(), b.delivered_on()) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });
}

/// Render the printable declaration as a standalone HTML document.
pub fn render_summary(
    session: &DeclarationSession,
    event_name: &str,
    generated_at: DateTime<Utc>,
) -> Result<String, SailError> {
    session.validate()?;
    let record = session.record();
    let or_missing = |value: &str| {
        if value.trim().is_empty() {
            "Not Provided".to_string()
        } else {
            escape_html(value)
        }
    };

    let mut rows = String::new();
    for slot in Slot::ALL {
        let Some(sail) = session.slot_record(slot) else {
            continue;
        };
        let na = |value: &str| {
            if value.is_empty() {
                "N/A".to_string()
            } else {
                escape_html(value)
            }
        };
        rows.push_str(&format!(
            "        <tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
            slot.label(),
            na(&sail.certificate_no),
            na(&sail.sailmaker),
            na(sail.delivery_date.as_deref().unwrap_or("")),
            na(record.colour_for(slot).unwrap_or("")),
        ));
    }

    let event = escape_html(event_name);
    let mut html = String::new();
    html.push_str("<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n");
    html.push_str("<title>Sail Declaration - Print</title>\n");
    html.push_str(
        "<style>\n  body { font-family: sans-serif; padding: 20px; }\n  \
         table { border-collapse: collapse; width: 100%; }\n  \
         th, td { border: 1px solid #999; padding: 4px 8px; text-align: left; }\n  \
         .signature td { border: none; }\n  \
         @media print { .no-print { display: none; } }\n</style>\n",
    );
    html.push_str("</head>\n<body>\n");
    html.push_str(&format!(
        "<header>\n  <h1>{event}</h1>\n  <h2>Sail Declaration</h2>\n  \
         <p>This form lists all the sails to be used for the {event}.</p>\n</header>\n"
    ));
    html.push_str(&format!(
        "<h3>Sail List for Hull {}</h3>\n",
        escape_html(record.hull_number.trim())
    ));
    html.push_str(&format!(
        "<p><strong>Boat Name:</strong> {}</p>\n",
        or_missing(&record.boat_name)
    ));
    html.push_str(&format!(
        "<p><strong>Owner:</strong> {}</p>\n",
        escape_html(&record.owner)
    ));
    html.push_str(&format!(
        "<p><strong>Email:</strong> {}</p>\n",
        or_missing(&record.email)
    ));
    html.push_str(&format!(
        "<p><strong>Mobile:</strong> {}</p>\n",
        or_missing(&record.mobile)
    ));
    html.push_str(
        "<table>\n  <thead>\n    <tr><th>Sail Type</th><th>Certificate No.</th>\
         <th>Sailmaker</th><th>Delivery Date</th><th>Color/Description</th></tr>\n  \
         </thead>\n  <tbody>\n",
    );
    html.push_str(&rows);
    html.push_str("  </tbody>\n</table>\n");
    html.push_str(
        "<p>By signing this form I declare that my sails will be in compliance with \
         the class rules at all times.</p>\n",
    );
    html.push_str(
        "<table class=\"signature\">\n  <tr><td>Owner's Signature: _________________________</td>\
         <td>Date: _________________________</td></tr>\n</table>\n",
    );
    html.push_str(&format!(
        "<p><small>Generated: {}</small></p>\n",
        generated_at.format("%Y-%m-%d %H:%M UTC")
    ));
    html.push_str("</body>\n</html>\n");
    Ok(html)
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}
