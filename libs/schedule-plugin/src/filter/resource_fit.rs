use fnsched_model::{InstanceInfo, ResourceUnit, StatusCode, EPSILON};
use tracing::trace;

use crate::context::PreAllocatedContext;
use crate::framework::{FilterPlugin, Filtered};
use crate::RESOURCE_FIT_FILTER_NAME;

/// Rejects units whose allocatable resources, minus what is provisionally
/// allocated this round, cannot hold the instance.
///
/// On success `available_for_request` is how many instances of the same
/// shape still fit.
#[derive(Debug, Default, Clone, Copy)]
pub struct ResourceFitFilter;

impl FilterPlugin for ResourceFitFilter {
    fn name(&self) -> &'static str {
        RESOURCE_FIT_FILTER_NAME
    }

    fn filter(&self, ctx: &mut PreAllocatedContext, instance: &InstanceInfo, unit: &ResourceUnit) -> Filtered {
        let available = match ctx.allocated.get(&unit.id) {
            Some(allocated) => &unit.allocatable - allocated,
            None => unit.allocatable.clone(),
        };
        if !available.is_valid() {
            return Filtered::fail(StatusCode::ResourceNotEnough, "No Resources Available");
        }

        let required = instance
            .resources
            .iter()
            .filter(|(_, value)| value.abs() >= EPSILON)
            .map(|(name, value)| format!("{name}: {value}"))
            .collect::<Vec<_>>()
            .join(", ");

        let mut fit_count: Option<f64> = None;
        for (name, value) in instance.resources.iter() {
            if value.abs() < EPSILON {
                continue;
            }
            if value < 0.0 {
                return Filtered::fail(StatusCode::InvalidResourceParameter, format!("{name}: Invalid Value"))
                    .with_required(required);
            }
            let Some(capacity) = unit.capacity.get(name) else {
                return Filtered::fail(StatusCode::ParameterError, format!("{name}: Not Found"))
                    .with_required(required);
            };
            if value > capacity + EPSILON {
                return Filtered::fail(StatusCode::ResourceNotEnough, format!("{name}: Out Of Capacity"))
                    .with_required(required);
            }
            let Some(free) = available.get(name) else {
                return Filtered::fail(StatusCode::ParameterError, format!("{name}: Not Found"))
                    .with_required(required);
            };
            if value > free + EPSILON {
                return Filtered::fail(StatusCode::ResourceNotEnough, format!("{name}: Not Enough"))
                    .with_required(required);
            }
            let fits = ((free + EPSILON) / value).floor();
            fit_count = Some(fit_count.map_or(fits, |count| count.min(fits)));
        }

        let count = match fit_count {
            Some(count) if count >= 1.0 => count.min(f64::from(i32::MAX)) as i32,
            _ => 1,
        };
        trace!(unit_id = %unit.id, count, "Resource fit");
        Filtered::pass(count).with_required(required)
    }
}
