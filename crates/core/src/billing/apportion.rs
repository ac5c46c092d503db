//! Exact apportionment of a cost by weighted units

use std::cmp::Ordering;

use uuid::Uuid;

use crate::models::Money;

/// Split `total` across `shares` in proportion to their units.
///
/// Each share is `total × units / Σunits` rounded half-up. Any rounding
/// difference is then settled one minor unit at a time: a shortfall goes to
/// shares that were rounded down, largest remainder first; an excess is
/// taken from shares that were rounded up, smallest remainder first. Ties
/// go by id. The result is in input order and always sums to `total`.
/// With zero total units every share is zero.
pub fn apportion(total: Money, shares: &[(Uuid, u64)]) -> Vec<Money> {
    let total_units: i128 = shares.iter().map(|&(_, units)| units as i128).sum();
    if total_units == 0 {
        return vec![Money::ZERO; shares.len()];
    }

    let total_minor = total.minor() as i128;
    let mut parts: Vec<Part> = shares
        .iter()
        .map(|&(id, units)| {
            let exact = total_minor * units as i128;
            let floor = exact.div_euclid(total_units);
            let remainder = exact.rem_euclid(total_units);
            let rounded_up = 2 * remainder >= total_units;
            Part {
                id,
                remainder,
                rounded_up,
                amount: floor + rounded_up as i128,
            }
        })
        .collect();

    let diff = total_minor - parts.iter().map(|p| p.amount).sum::<i128>();
    match diff.cmp(&0) {
        Ordering::Greater => {
            let mut candidates: Vec<&mut Part> = parts.iter_mut().filter(|p| !p.rounded_up).collect();
            candidates.sort_by(|a, b| b.remainder.cmp(&a.remainder).then(a.id.cmp(&b.id)));
            for part in candidates.into_iter().take(diff as usize) {
                part.amount += 1;
            }
        }
        Ordering::Less => {
            let mut candidates: Vec<&mut Part> = parts.iter_mut().filter(|p| p.rounded_up).collect();
            candidates.sort_by(|a, b| a.remainder.cmp(&b.remainder).then(a.id.cmp(&b.id)));
            for part in candidates.into_iter().take((-diff) as usize) {
                part.amount -= 1;
            }
        }
        Ordering::Equal => {}
    }

    parts.into_iter().map(|p| Money(p.amount as i64)).collect()
}

struct Part {
    id: Uuid,
    remainder: i128,
    rounded_up: bool,
    amount: i128,
}
