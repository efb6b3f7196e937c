//! Entity templates: component bundle + ACL + optional interest.

use crate::acl::EntityAcl;
use crate::component::Component;
use crate::error::ConfigurationError;
use crate::interest::{InterestComponent, InterestDescriptor};
use worldsync_env::{ComponentData, ComponentKind, EntityTemplate};

/// Assembles the component bundle of a new entity.
#[derive(Debug, Clone, Default)]
pub struct EntityBuilder {
    components: EntityTemplate,
}

impl EntityBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a typed component, replacing any earlier value of the same kind.
    pub fn add<C: Component>(mut self, component: &C) -> Result<Self, ConfigurationError> {
        let data = encode(component)?;
        self.components.insert(C::KIND, data);
        Ok(self)
    }

    /// Adds raw component data.
    pub fn add_data(mut self, kind: ComponentKind, data: ComponentData) -> Self {
        self.components.insert(kind, data);
        self
    }

    pub fn build(self) -> EntityTemplate {
        self.components
    }
}

fn encode<C: Component>(component: &C) -> Result<ComponentData, ConfigurationError> {
    component
        .to_data()
        .map_err(|e| ConfigurationError::Invalid(format!("cannot encode {}: {}", C::NAME, e)))
}

/// Everything the factory needs to create one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct CreationRequest {
    /// Caller-produced component bundle
    pub components: EntityTemplate,

    /// Result of the authority policy
    pub acl: EntityAcl,

    /// Optional interest declarations
    pub interest: Vec<InterestDescriptor>,
}

impl CreationRequest {
    pub fn new(components: EntityTemplate, acl: EntityAcl) -> Self {
        Self {
            components,
            acl,
            interest: Vec::new(),
        }
    }

    pub fn with_interest(mut self, interest: InterestDescriptor) -> Self {
        self.interest.push(interest);
        self
    }

    /// Produces the final template (bundle + ACL + interest).
    ///
    /// # Errors
    /// * `MissingWriteRequirement` - an attached component is not covered by the ACL
    /// * `MissingComponent` - an interest anchor is not attached to the entity
    pub fn assemble(&self) -> Result<EntityTemplate, ConfigurationError> {
        let mut template = self.components.clone();
        template.insert(ComponentKind::ENTITY_ACL, encode(&self.acl)?);

        if !self.interest.is_empty() {
            let interest = InterestComponent::from_descriptors(&self.interest);
            template.insert(ComponentKind::INTEREST, encode(&interest)?);
        }

        for descriptor in &self.interest {
            if !template.contains_key(&descriptor.anchor) {
                return Err(ConfigurationError::MissingComponent(descriptor.anchor));
            }
        }

        for kind in template.keys() {
            if !self.acl.covers(*kind) {
                return Err(ConfigurationError::MissingWriteRequirement(*kind));
            }
        }

        Ok(template)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acl::{compute_acl, Attribute};
    use crate::component::Position;
    use crate::interest::{build_interest, QueryConstraint};

    fn acl(kinds: &[ComponentKind]) -> EntityAcl {
        compute_acl(
            &Attribute::from("simulation"),
            &[Attribute::from("AI"), Attribute::from("client")],
            kinds,
        )
        .unwrap()
    }

    #[test]
    fn test_assemble_adds_acl_component() {
        let components = EntityBuilder::new()
            .add(&Position::new(1.0, 2.0, 3.0))
            .unwrap()
            .build();
        let request = CreationRequest::new(components, acl(&[ComponentKind::POSITION, ComponentKind::ENTITY_ACL]));

        let template = request.assemble().unwrap();
        assert_eq!(template.len(), 2);
        assert!(template.contains_key(&ComponentKind::ENTITY_ACL));
    }

    #[test]
    fn test_uncovered_component_rejected() {
        let components = EntityBuilder::new()
            .add(&Position::default())
            .unwrap()
            .add_data(ComponentKind(1001), ComponentData::new().with_field("remaining_health", 100))
            .build();
        let request = CreationRequest::new(components, acl(&[ComponentKind::POSITION, ComponentKind::ENTITY_ACL]));

        assert_eq!(
            request.assemble(),
            Err(ConfigurationError::MissingWriteRequirement(ComponentKind(1001)))
        );
    }

    #[test]
    fn test_interest_anchor_must_be_attached() {
        let components = EntityBuilder::new().add(&Position::default()).unwrap().build();
        let interest = build_interest(
            ComponentKind(1003),
            vec![QueryConstraint::RelativeSphere { radius: 10.0 }],
            &[],
            30.0,
        )
        .unwrap();
        let request = CreationRequest::new(
            components,
            acl(&[ComponentKind::POSITION, ComponentKind::ENTITY_ACL, ComponentKind::INTEREST]),
        )
        .with_interest(interest);

        assert_eq!(
            request.assemble(),
            Err(ConfigurationError::MissingComponent(ComponentKind(1003)))
        );
    }
}
