//! Search criteria state: option panels, occasion-dependent date selection and the
//! two-month calendar cursor.

use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use vdisc_core::{FieldId, SearchCriteria};

pub const CRATE_NAME: &str = "vdisc-search";

/// The only occasion that selects a multi-day range.
pub const FUNERAL: &str = "Funeral";

/// Longest completed range, counting both endpoints.
pub const MAX_RANGE_DAYS: i64 = 21;

pub const OCCASION_OPTIONS: [&str; 7] = [
    "Birthday",
    "Wedding",
    "Anniversary",
    "Funeral",
    "Baptism",
    "Corporate Event",
    "Reunion",
];

pub const GUEST_OPTIONS: [&str; 4] = ["1-50", "51-100", "101-300", "301+"];

pub const PER_HEAD_BUDGETS: [&str; 4] = [
    "₱500 and below",
    "₱501 - ₱1,000",
    "₱1,001 - ₱2,000",
    "₱2,001 and above",
];

pub const WHOLE_EVENT_BUDGETS: [&str; 4] = [
    "₱50,000 and below",
    "₱50,001 - ₱100,000",
    "₱100,001 - ₱250,000",
    "₱250,001 and above",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SearchError {
    #[error("Please fill in all search fields (missing: {})", join_fields(.missing))]
    Incomplete { missing: Vec<FieldId> },
    #[error("`{value}` is not a {field} option")]
    UnknownOption { field: FieldId, value: String },
    #[error("{0} is in the past")]
    PastDate(NaiveDate),
}

fn join_fields(fields: &[FieldId]) -> String {
    fields
        .iter()
        .map(|f| f.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn is_funeral(occasion: &str) -> bool {
    occasion.trim().eq_ignore_ascii_case(FUNERAL)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetMode {
    #[default]
    PerHead,
    WholeEvent,
}

impl BudgetMode {
    pub fn options(self) -> &'static [&'static str] {
        match self {
            BudgetMode::PerHead => &PER_HEAD_BUDGETS,
            BudgetMode::WholeEvent => &WHOLE_EVENT_BUDGETS,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            BudgetMode::PerHead => "Per head",
            BudgetMode::WholeEvent => "Whole event",
        }
    }
}

/// How a day click is interpreted; derived from the occasion value passed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionMode {
    Single,
    Range,
}

impl SelectionMode {
    pub fn for_occasion(occasion: &str) -> Self {
        if is_funeral(occasion) {
            SelectionMode::Range
        } else {
            SelectionMode::Single
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DateSelection {
    #[default]
    Empty,
    Single { date: NaiveDate },
    RangeAnchored { anchor: NaiveDate },
    /// `start <= end` and `span_days(start, end) <= MAX_RANGE_DAYS`.
    RangeComplete { start: NaiveDate, end: NaiveDate },
}

impl DateSelection {
    /// Text for the "when" slot; `None` while nothing usable is selected.
    pub fn display_value(&self) -> Option<String> {
        match *self {
            DateSelection::Single { date } => Some(format_day(date)),
            DateSelection::RangeComplete { start, end } if start == end => Some(format_day(start)),
            DateSelection::RangeComplete { start, end } => {
                Some(format!("{} - {}", format_day(start), format_day(end)))
            }
            DateSelection::Empty | DateSelection::RangeAnchored { .. } => None,
        }
    }

    pub fn is_endpoint(&self, date: NaiveDate) -> bool {
        match *self {
            DateSelection::Empty => false,
            DateSelection::Single { date: d } => d == date,
            DateSelection::RangeAnchored { anchor } => anchor == date,
            DateSelection::RangeComplete { start, end } => start == date || end == date,
        }
    }

    pub fn in_range(&self, date: NaiveDate) -> bool {
        match *self {
            DateSelection::RangeComplete { start, end } => start <= date && date <= end,
            _ => false,
        }
    }
}

/// Inclusive day count between two dates, in either order.
pub fn span_days(a: NaiveDate, b: NaiveDate) -> i64 {
    (b - a).num_days().abs() + 1
}

/// `"January 5, 2025"`.
pub fn format_day(date: NaiveDate) -> String {
    date.format("%B %-d, %Y").to_string()
}

/// The single transition function for a day click. Both calendar months call this.
///
/// The caller guarantees `clicked` is not in the past.
pub fn select_day(state: &DateSelection, clicked: NaiveDate, mode: SelectionMode) -> DateSelection {
    if mode == SelectionMode::Single {
        return DateSelection::Single { date: clicked };
    }
    match *state {
        DateSelection::RangeAnchored { anchor } => {
            let (start, end) = if anchor <= clicked {
                (anchor, clicked)
            } else {
                (clicked, anchor)
            };
            if span_days(start, end) <= MAX_RANGE_DAYS {
                DateSelection::RangeComplete { start, end }
            } else {
                // Overflow restarts from the new click rather than extending.
                DateSelection::RangeAnchored { anchor: clicked }
            }
        }
        DateSelection::Empty | DateSelection::Single { .. } | DateSelection::RangeComplete { .. } => {
            DateSelection::RangeAnchored { anchor: clicked }
        }
    }
}

/// Past days are disabled in the grid and rejected on click.
pub fn is_past_day(date: NaiveDate, today: NaiveDate) -> bool {
    date < today
}

pub fn is_past_date(day: u32, month: u32, year: i32, today: NaiveDate) -> bool {
    NaiveDate::from_ymd_opt(year, month, day).map_or(true, |date| is_past_day(date, today))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Prev,
    Next,
}

/// Left calendar cursor. The right calendar is always the following month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarViewState {
    pub month: u32,
    pub year: i32,
}

impl CalendarViewState {
    pub fn containing(date: NaiveDate) -> Self {
        use chrono::Datelike;
        Self {
            month: date.month(),
            year: date.year(),
        }
    }

    pub fn step(self, direction: Direction) -> Self {
        match (direction, self.month) {
            (Direction::Next, 12) => Self {
                month: 1,
                year: self.year + 1,
            },
            (Direction::Next, m) => Self {
                month: m + 1,
                year: self.year,
            },
            (Direction::Prev, 1) => Self {
                month: 12,
                year: self.year - 1,
            },
            (Direction::Prev, m) => Self {
                month: m - 1,
                year: self.year,
            },
        }
    }

    pub fn following(self) -> Self {
        self.step(Direction::Next)
    }

    pub fn first_day(self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, 1)
    }

    pub fn days_in_month(self) -> u32 {
        use chrono::Datelike;
        self.following()
            .first_day()
            .and_then(|d| d.pred_opt())
            .map(|d| d.day())
            .unwrap_or(0)
    }

    pub fn title(self) -> String {
        self.first_day()
            .map(|d| d.format("%B %Y").to_string())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DayCell {
    pub date: NaiveDate,
    pub disabled: bool,
    pub selected: bool,
    pub in_range: bool,
    pub is_today: bool,
}

/// Day cells for one month. Both visible months render through here so highlighting never drifts.
pub fn month_grid(view: CalendarViewState, selection: &DateSelection, today: NaiveDate) -> Vec<DayCell> {
    (1..=view.days_in_month())
        .filter_map(|day| NaiveDate::from_ymd_opt(view.year, view.month, day))
        .map(|date| DayCell {
            date,
            disabled: is_past_day(date, today),
            selected: selection.is_endpoint(date),
            in_range: selection.in_range(date),
            is_today: date == today,
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalendarNavigator {
    cursor: CalendarViewState,
}

impl CalendarNavigator {
    pub fn new(cursor: CalendarViewState) -> Self {
        Self { cursor }
    }

    pub fn cursor(&self) -> CalendarViewState {
        self.cursor
    }

    /// Either month's prev/next control lands here; both months move together.
    pub fn navigate_month(&mut self, direction: Direction) {
        self.cursor = self.cursor.step(direction);
    }

    pub fn visible_months(&self) -> [CalendarViewState; 2] {
        [self.cursor, self.cursor.following()]
    }
}

pub fn to_query_string(criteria: &SearchCriteria) -> Result<String, serde_urlencoded::ser::Error> {
    serde_urlencoded::to_string(criteria)
}

pub fn from_query_string(query: &str) -> Result<SearchCriteria, serde_urlencoded::de::Error> {
    serde_urlencoded::from_str(query.trim_start_matches('?'))
}

/// The five search fields, which panel is open, and the date/calendar sub-state.
#[derive(Debug, Clone)]
pub struct SearchFieldModel {
    criteria: SearchCriteria,
    active_field: Option<FieldId>,
    selection: DateSelection,
    calendar: CalendarNavigator,
    budget_mode: BudgetMode,
    today: NaiveDate,
}

impl SearchFieldModel {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            criteria: SearchCriteria::default(),
            active_field: None,
            selection: DateSelection::Empty,
            calendar: CalendarNavigator::new(CalendarViewState::containing(today)),
            budget_mode: BudgetMode::default(),
            today,
        }
    }

    pub fn for_local_today() -> Self {
        Self::new(Local::now().date_naive())
    }

    pub fn criteria(&self) -> &SearchCriteria {
        &self.criteria
    }

    pub fn active_field(&self) -> Option<FieldId> {
        self.active_field
    }

    pub fn selection(&self) -> &DateSelection {
        &self.selection
    }

    pub fn calendar(&self) -> &CalendarNavigator {
        &self.calendar
    }

    pub fn budget_mode(&self) -> BudgetMode {
        self.budget_mode
    }

    pub fn today(&self) -> NaiveDate {
        self.today
    }

    /// Opening a panel implicitly closes whichever one was open.
    pub fn open_field(&mut self, id: FieldId) {
        self.active_field = Some(id);
    }

    pub fn close_field(&mut self) {
        self.active_field = None;
    }

    pub fn set_value(&mut self, id: FieldId, value: impl Into<String>) {
        match id {
            FieldId::Occasion => self.set_occasion(value),
            _ => self.criteria.set(id, value),
        }
    }

    /// Leaving Funeral drops any range state and the "when" text it produced.
    pub fn set_occasion(&mut self, value: impl Into<String>) {
        let value = value.into();
        let leaving_funeral = is_funeral(&self.criteria.occasion) && !is_funeral(&value);
        self.criteria.occasion = value;
        if leaving_funeral {
            debug!("occasion left Funeral; clearing date range");
            self.selection = DateSelection::Empty;
            self.criteria.when.clear();
        }
    }

    pub fn select_occasion(&mut self, label: &str) -> Result<(), SearchError> {
        let option = find_option(&OCCASION_OPTIONS, FieldId::Occasion, label)?;
        self.set_occasion(option);
        self.close_field();
        Ok(())
    }

    pub fn select_guest(&mut self, label: &str) -> Result<(), SearchError> {
        let option = find_option(&GUEST_OPTIONS, FieldId::Guest, label)?;
        self.criteria.guest = option.to_string();
        self.close_field();
        Ok(())
    }

    /// Switching modes clears a budget picked from the other mode's brackets.
    pub fn set_budget_mode(&mut self, mode: BudgetMode) {
        if mode == self.budget_mode {
            return;
        }
        self.budget_mode = mode;
        if !mode.options().contains(&self.criteria.budget.as_str()) {
            self.criteria.budget.clear();
        }
    }

    pub fn select_budget(&mut self, label: &str) -> Result<(), SearchError> {
        let option = find_option(self.budget_mode.options(), FieldId::Budget, label)?;
        self.criteria.budget = option.to_string();
        self.close_field();
        Ok(())
    }

    pub fn navigate_month(&mut self, direction: Direction) {
        self.calendar.navigate_month(direction);
    }

    /// Both visible months with their day cells.
    pub fn calendar_months(&self) -> [(CalendarViewState, Vec<DayCell>); 2] {
        self.calendar
            .visible_months()
            .map(|view| (view, month_grid(view, &self.selection, self.today)))
    }

    /// Day click from either calendar. Past days change nothing.
    pub fn click_day(&mut self, date: NaiveDate) -> Result<(), SearchError> {
        if is_past_day(date, self.today) {
            return Err(SearchError::PastDate(date));
        }
        let mode = SelectionMode::for_occasion(&self.criteria.occasion);
        self.selection = select_day(&self.selection, date, mode);
        self.criteria.when = self.selection.display_value().unwrap_or_default();
        debug!(?mode, selection = ?self.selection, "day selected");
        if mode == SelectionMode::Single {
            self.close_field();
        }
        Ok(())
    }

    /// Trimmed snapshot of the criteria, or the blocking validation message.
    pub fn submit(&self) -> Result<SearchCriteria, SearchError> {
        validate_criteria(&self.criteria)
    }
}

/// Completeness first, then guest and budget against the closed option lists.
/// Budgets from either mode are accepted since the criteria do not carry the mode.
pub fn validate_criteria(criteria: &SearchCriteria) -> Result<SearchCriteria, SearchError> {
    let missing = criteria.missing_fields();
    if !missing.is_empty() {
        return Err(SearchError::Incomplete { missing });
    }
    let criteria = criteria.trimmed();
    find_option(&GUEST_OPTIONS, FieldId::Guest, &criteria.guest)?;
    if !PER_HEAD_BUDGETS.contains(&criteria.budget.as_str())
        && !WHOLE_EVENT_BUDGETS.contains(&criteria.budget.as_str())
    {
        return Err(SearchError::UnknownOption {
            field: FieldId::Budget,
            value: criteria.budget,
        });
    }
    Ok(criteria)
}

fn find_option<'a>(options: &[&'a str], field: FieldId, label: &str) -> Result<&'a str, SearchError> {
    options
        .iter()
        .copied()
        .find(|o| *o == label.trim())
        .ok_or_else(|| SearchError::UnknownOption {
            field,
            value: label.to_string(),
        })
}
