//! Developer guardrails and invariants
//!
//! Debug assertions for detecting impossible states during development.
//! These checks are compiled out in release builds.

use uuid::Uuid;

use crate::models::{Bazar, Bill, Money, Seat, SeatSummary};

/// Validate that a seat's status and occupant agree
pub fn assert_seat_invariants(seat: &Seat) {
    debug_assert!(
        seat.status.accepts_occupant(seat.occupant_id),
        "Seat {} has status {} with occupant {:?}",
        seat.id,
        seat.status,
        seat.occupant_id
    );

    debug_assert!(
        !seat.rent.is_negative(),
        "Seat {} has negative rent {}",
        seat.id,
        seat.rent
    );
}

/// Validate that a hostel's seat breakdown fits its total
pub fn assert_seat_summary_invariants(hostel_id: Uuid, seats: &SeatSummary) {
    debug_assert!(
        seats.within_capacity(),
        "Hostel {} seat breakdown {:?} exceeds total",
        hostel_id,
        seats
    );
}

/// Validate that a bazar's grand total matches its items
pub fn assert_bazar_invariants(bazar: &Bazar) {
    debug_assert_eq!(
        bazar.grand_total,
        bazar.items_total(),
        "Bazar {} grand total drifted from its items",
        bazar.id
    );

    for item in &bazar.items {
        debug_assert!(
            item.quantity.is_positive(),
            "Grocery item {} has non-positive quantity",
            item.id
        );
        debug_assert_eq!(
            Some(item.total_cost),
            item.price_per_unit.checked_times(item.quantity),
            "Grocery item {} total does not match quantity x price",
            item.id
        );
    }
}

/// Validate that meal shares add up to the grocery cost
pub fn assert_bill_invariants(bill: &Bill) {
    if bill.total_meal_units > 0 {
        debug_assert_eq!(
            bill.meal_cost_sum(),
            bill.total_grocery_cost,
            "Bill for hostel {} does not conserve grocery cost",
            bill.hostel_id
        );
    } else {
        debug_assert_eq!(
            bill.meal_cost_sum(),
            Money::ZERO,
            "Bill for hostel {} charges meals without meal units",
            bill.hostel_id
        );
    }

    // Members are listed once, in id order
    debug_assert!(
        bill.members.windows(2).all(|w| w[0].user_id < w[1].user_id),
        "Bill for hostel {} lists members out of order",
        bill.hostel_id
    );
}
