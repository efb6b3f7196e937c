//! The "INTEREST" Declarator - query-based subscriptions.
//!
//! An [`InterestDescriptor`] is attached to one anchor component. Whichever
//! worker holds write authority over the anchor receives a stream of the
//! entities matching any of the descriptor's queries.
//!
//! Constraints are evaluated on positions in meters. `y` is up, so
//! cylinders extend infinitely along `y`.
//!
//! ```text
//!   anchor (authoritative) ──► query: Sphere(c, r) ──► result kinds @ freq
//!                              query: Component(k) ──► result kinds @ freq
//! ```

use crate::component::Component;
use crate::error::ConfigurationError;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use worldsync_env::{ComponentKind, EntityId};

/// A spatial or relational filter over entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueryConstraint {
    Sphere { center: Vector3<f64>, radius: f64 },
    Cylinder { center: Vector3<f64>, radius: f64 },
    Box { center: Vector3<f64>, edge_length: Vector3<f64> },
    /// Sphere centred on the anchor entity's position.
    RelativeSphere { radius: f64 },
    RelativeCylinder { radius: f64 },
    RelativeBox { edge_length: Vector3<f64> },
    EntityId { entity_id: EntityId },
    Component { component: ComponentKind },
    And { constraints: Vec<QueryConstraint> },
    Or { constraints: Vec<QueryConstraint> },
}

/// The facts about an entity a constraint is evaluated against.
#[derive(Debug, Clone, Copy)]
pub struct QueryCandidate<'a> {
    pub entity_id: EntityId,
    pub position: Option<Vector3<f64>>,
    pub components: &'a [ComponentKind],
}

impl QueryConstraint {
    /// Checks structural validity (positive extents, non-empty combinators).
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let positive = |value: f64, what: &str| {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(ConfigurationError::InvalidConstraint(format!(
                    "{} must be positive, got {}",
                    what, value
                )))
            }
        };

        match self {
            QueryConstraint::Sphere { radius, .. }
            | QueryConstraint::Cylinder { radius, .. }
            | QueryConstraint::RelativeSphere { radius }
            | QueryConstraint::RelativeCylinder { radius } => positive(*radius, "radius"),
            QueryConstraint::Box { edge_length, .. } | QueryConstraint::RelativeBox { edge_length } => {
                for edge in edge_length.iter() {
                    positive(*edge, "edge length")?;
                }
                Ok(())
            }
            QueryConstraint::EntityId { .. } | QueryConstraint::Component { .. } => Ok(()),
            QueryConstraint::And { constraints } | QueryConstraint::Or { constraints } => {
                if constraints.is_empty() {
                    return Err(ConfigurationError::InvalidConstraint(
                        "combinator without operands".to_string(),
                    ));
                }
                constraints.iter().try_for_each(QueryConstraint::validate)
            }
        }
    }

    /// Evaluates the constraint.
    ///
    /// Spatial constraints never match a candidate without a position;
    /// relative constraints never match without an anchor position.
    pub fn matches(&self, candidate: &QueryCandidate<'_>, anchor: Option<&Vector3<f64>>) -> bool {
        match self {
            QueryConstraint::Sphere { center, radius } => in_sphere(candidate, center, *radius),
            QueryConstraint::Cylinder { center, radius } => in_cylinder(candidate, center, *radius),
            QueryConstraint::Box { center, edge_length } => in_box(candidate, center, edge_length),
            QueryConstraint::RelativeSphere { radius } => {
                anchor.map(|a| in_sphere(candidate, a, *radius)).unwrap_or(false)
            }
            QueryConstraint::RelativeCylinder { radius } => {
                anchor.map(|a| in_cylinder(candidate, a, *radius)).unwrap_or(false)
            }
            QueryConstraint::RelativeBox { edge_length } => {
                anchor.map(|a| in_box(candidate, a, edge_length)).unwrap_or(false)
            }
            QueryConstraint::EntityId { entity_id } => candidate.entity_id == *entity_id,
            QueryConstraint::Component { component } => candidate.components.contains(component),
            QueryConstraint::And { constraints } => constraints.iter().all(|c| c.matches(candidate, anchor)),
            QueryConstraint::Or { constraints } => constraints.iter().any(|c| c.matches(candidate, anchor)),
        }
    }
}

fn in_sphere(candidate: &QueryCandidate<'_>, center: &Vector3<f64>, radius: f64) -> bool {
    candidate
        .position
        .map(|p| (p - center).norm() <= radius)
        .unwrap_or(false)
}

fn in_cylinder(candidate: &QueryCandidate<'_>, center: &Vector3<f64>, radius: f64) -> bool {
    candidate
        .position
        .map(|p| {
            let dx = p.x - center.x;
            let dz = p.z - center.z;
            (dx * dx + dz * dz).sqrt() <= radius
        })
        .unwrap_or(false)
}

fn in_box(candidate: &QueryCandidate<'_>, center: &Vector3<f64>, edge_length: &Vector3<f64>) -> bool {
    candidate
        .position
        .map(|p| {
            let d = (p - center).abs();
            d.x <= edge_length.x / 2.0 && d.y <= edge_length.y / 2.0 && d.z <= edge_length.z / 2.0
        })
        .unwrap_or(false)
}

/// One (constraint, result kinds, frequency) tuple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterestQuery {
    pub constraint: QueryConstraint,

    /// Components streamed for matches; empty means the full snapshot
    pub result_components: Vec<ComponentKind>,

    /// Requested refresh rate
    pub frequency_hz: f32,
}

impl InterestQuery {
    /// True if matches of this query should carry `kind`.
    pub fn wants(&self, kind: ComponentKind) -> bool {
        self.result_components.is_empty() || self.result_components.contains(&kind)
    }
}

/// Queries attached to one anchor component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterestDescriptor {
    pub anchor: ComponentKind,
    pub queries: Vec<InterestQuery>,
}

impl InterestDescriptor {
    /// True if any query matches the candidate.
    pub fn matches(&self, candidate: &QueryCandidate<'_>, anchor_position: Option<&Vector3<f64>>) -> bool {
        self.queries
            .iter()
            .any(|q| q.constraint.matches(candidate, anchor_position))
    }
}

/// Builds an interest descriptor: one query per constraint, all sharing the
/// same result kinds and frequency.
///
/// # Errors
/// * `EmptyConstraints` - a descriptor without constraints matches nothing
/// * `NonPositiveFrequency` - frequency must be finite and > 0
/// * `InvalidConstraint` - a constraint failed validation
pub fn build_interest(
    anchor: ComponentKind,
    constraints: Vec<QueryConstraint>,
    result_components: &[ComponentKind],
    frequency_hz: f32,
) -> Result<InterestDescriptor, ConfigurationError> {
    if constraints.is_empty() {
        return Err(ConfigurationError::EmptyConstraints);
    }
    if !(frequency_hz.is_finite() && frequency_hz > 0.0) {
        return Err(ConfigurationError::NonPositiveFrequency(frequency_hz));
    }
    for constraint in &constraints {
        constraint.validate()?;
    }

    let queries = constraints
        .into_iter()
        .map(|constraint| InterestQuery {
            constraint,
            result_components: result_components.to_vec(),
            frequency_hz,
        })
        .collect();

    Ok(InterestDescriptor { anchor, queries })
}

/// The `Interest` component: every descriptor of an entity keyed by anchor.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InterestComponent {
    pub component_interest: BTreeMap<ComponentKind, Vec<InterestQuery>>,
}

impl InterestComponent {
    /// Merges descriptors; queries of descriptors sharing an anchor are concatenated.
    pub fn from_descriptors<'a>(descriptors: impl IntoIterator<Item = &'a InterestDescriptor>) -> Self {
        let mut component_interest: BTreeMap<ComponentKind, Vec<InterestQuery>> = BTreeMap::new();
        for descriptor in descriptors {
            component_interest
                .entry(descriptor.anchor)
                .or_default()
                .extend(descriptor.queries.iter().cloned());
        }
        Self { component_interest }
    }

    pub fn descriptors(&self) -> Vec<InterestDescriptor> {
        self.component_interest
            .iter()
            .map(|(anchor, queries)| InterestDescriptor {
                anchor: *anchor,
                queries: queries.clone(),
            })
            .collect()
    }
}

impl Component for InterestComponent {
    const KIND: ComponentKind = ComponentKind::INTEREST;
    const NAME: &'static str = "Interest";
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(position: Option<Vector3<f64>>, components: &[ComponentKind]) -> QueryCandidate<'_> {
        QueryCandidate {
            entity_id: EntityId(7),
            position,
            components,
        }
    }

    #[test]
    fn test_build_interest_one_query_per_constraint() {
        let interest = build_interest(
            ComponentKind(1003),
            vec![
                QueryConstraint::Sphere {
                    center: Vector3::new(1.0, 2.0, 3.0),
                    radius: 2000.0,
                },
                QueryConstraint::Component {
                    component: ComponentKind(1001),
                },
            ],
            &[ComponentKind(1001), ComponentKind::POSITION],
            30.0,
        )
        .unwrap();

        assert_eq!(interest.anchor, ComponentKind(1003));
        assert_eq!(interest.queries.len(), 2);
        assert!(interest.queries.iter().all(|q| q.frequency_hz == 30.0));
    }

    #[test]
    fn test_empty_constraints_rejected() {
        let err = build_interest(ComponentKind::POSITION, vec![], &[], 30.0).unwrap_err();
        assert_eq!(err, ConfigurationError::EmptyConstraints);
    }

    #[test]
    fn test_non_positive_frequency_rejected() {
        let constraint = QueryConstraint::RelativeSphere { radius: 10.0 };

        let err = build_interest(ComponentKind::POSITION, vec![constraint.clone()], &[], 0.0).unwrap_err();
        assert_eq!(err, ConfigurationError::NonPositiveFrequency(0.0));

        assert!(build_interest(ComponentKind::POSITION, vec![constraint], &[], f32::NAN).is_err());
    }

    #[test]
    fn test_invalid_constraint_rejected() {
        let err = build_interest(
            ComponentKind::POSITION,
            vec![QueryConstraint::Or { constraints: vec![] }],
            &[],
            1.0,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidConstraint(_)));

        let err = build_interest(
            ComponentKind::POSITION,
            vec![QueryConstraint::Sphere {
                center: Vector3::zeros(),
                radius: -1.0,
            }],
            &[],
            1.0,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidConstraint(_)));
    }

    #[test]
    fn test_sphere_matching() {
        let sphere = QueryConstraint::Sphere {
            center: Vector3::new(1.0, 2.0, 3.0),
            radius: 10.0,
        };

        assert!(sphere.matches(&candidate(Some(Vector3::new(1.0, 2.0, 12.0)), &[]), None));
        assert!(!sphere.matches(&candidate(Some(Vector3::new(1.0, 2.0, 14.0)), &[]), None));
        assert!(!sphere.matches(&candidate(None, &[]), None));
    }

    #[test]
    fn test_cylinder_ignores_height() {
        let cylinder = QueryConstraint::Cylinder {
            center: Vector3::zeros(),
            radius: 5.0,
        };
        assert!(cylinder.matches(&candidate(Some(Vector3::new(3.0, 900.0, 4.0)), &[]), None));
        assert!(!cylinder.matches(&candidate(Some(Vector3::new(4.0, 0.0, 4.0)), &[]), None));
    }

    #[test]
    fn test_relative_constraints_need_anchor() {
        let relative = QueryConstraint::RelativeBox {
            edge_length: Vector3::new(10.0, 10.0, 10.0),
        };
        let c = candidate(Some(Vector3::new(104.0, 0.0, 0.0)), &[]);

        assert!(!relative.matches(&c, None));
        assert!(relative.matches(&c, Some(&Vector3::new(100.0, 0.0, 0.0))));
        assert!(!relative.matches(&c, Some(&Vector3::zeros())));
    }

    #[test]
    fn test_combinators() {
        let health = ComponentKind(1001);
        let and = QueryConstraint::And {
            constraints: vec![
                QueryConstraint::Component { component: health },
                QueryConstraint::RelativeSphere { radius: 5.0 },
            ],
        };
        let kinds = [health];
        let c = candidate(Some(Vector3::new(1.0, 0.0, 0.0)), &kinds);

        assert!(and.matches(&c, Some(&Vector3::zeros())));
        assert!(!and.matches(&candidate(Some(Vector3::new(1.0, 0.0, 0.0)), &[]), Some(&Vector3::zeros())));

        let or = QueryConstraint::Or {
            constraints: vec![
                QueryConstraint::EntityId { entity_id: EntityId(99) },
                QueryConstraint::Component { component: health },
            ],
        };
        assert!(or.matches(&c, None));
    }

    #[test]
    fn test_empty_result_kinds_is_full_snapshot() {
        let query = InterestQuery {
            constraint: QueryConstraint::Component {
                component: ComponentKind::POSITION,
            },
            result_components: vec![],
            frequency_hz: 1.0,
        };
        assert!(query.wants(ComponentKind(4242)));
    }

    #[test]
    fn test_interest_component_round_trip() {
        let a = build_interest(
            ComponentKind(1003),
            vec![QueryConstraint::RelativeSphere { radius: 50.0 }],
            &[ComponentKind::POSITION],
            30.0,
        )
        .unwrap();
        let b = build_interest(
            ComponentKind(1003),
            vec![QueryConstraint::Component {
                component: ComponentKind(1001),
            }],
            &[],
            5.0,
        )
        .unwrap();

        let component = InterestComponent::from_descriptors([&a, &b]);
        let data = component.to_data().unwrap();
        let decoded = InterestComponent::from_data(&data).unwrap();

        let descriptors = decoded.descriptors();
        assert_eq!(descriptors.len(), 1);
        assert_eq!(descriptors[0].queries.len(), 2);
    }
}
