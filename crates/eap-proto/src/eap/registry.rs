use super::{EapError, EapType, Payload};

/// Decodes the Type-Data of one method into a [`Payload`]
pub type PayloadConstructor = fn(&[u8]) -> Result<Payload, EapError>;

/// Registration of one method's payload codec
#[derive(Clone, Copy)]
pub struct MethodDescriptor {
    pub method: EapType,
    pub constructor: PayloadConstructor,
    /// Method whose packets this one carries when they arrive under the
    /// literal inner type (a tunnel's continuation fragments)
    pub wraps: Option<EapType>,
}

impl MethodDescriptor {
    pub const fn new(method: EapType, constructor: PayloadConstructor) -> Self {
        MethodDescriptor {
            method,
            constructor,
            wraps: None,
        }
    }

    pub const fn wrapping(mut self, inner: EapType) -> Self {
        self.wraps = Some(inner);
        self
    }
}

impl std::fmt::Debug for MethodDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodDescriptor")
            .field("method", &self.method)
            .field("wraps", &self.wraps)
            .finish_non_exhaustive()
    }
}

/// Table of payload codecs consulted by [`EapPacket::decode`](super::EapPacket::decode)
#[derive(Debug, Clone, Default)]
pub struct PayloadRegistry {
    descriptors: Vec<MethodDescriptor>,
}

impl PayloadRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every method this crate can decode
    pub fn standard() -> Self {
        Self::new()
            .with(MethodDescriptor::new(EapType::Identity, Payload::decode_identity))
            .with(MethodDescriptor::new(EapType::Nak, Payload::decode_nak))
            .with(MethodDescriptor::new(EapType::Gtc, Payload::decode_gtc))
            .with(MethodDescriptor::new(EapType::Tls, Payload::decode_tls))
            .with(MethodDescriptor::new(EapType::Peap, Payload::decode_tls).wrapping(EapType::Tls))
            .with(MethodDescriptor::new(EapType::MsChapV2, Payload::decode_mschapv2))
            .with(MethodDescriptor::new(EapType::Extensions, Payload::decode_extensions))
    }

    /// Register a descriptor, replacing any previous one for the same method
    pub fn register(&mut self, descriptor: MethodDescriptor) {
        self.descriptors.retain(|d| d.method != descriptor.method);
        self.descriptors.push(descriptor);
    }

    pub fn with(mut self, descriptor: MethodDescriptor) -> Self {
        self.register(descriptor);
        self
    }

    pub fn descriptor(&self, method: EapType) -> Option<&MethodDescriptor> {
        self.descriptors.iter().find(|d| d.method == method)
    }

    /// Resolve the codec for a literal type byte
    ///
    /// An exact registration wins; otherwise a method that declares the type
    /// as its wrapped inner type is used.
    pub fn lookup(&self, type_byte: u8) -> Option<&MethodDescriptor> {
        let method = EapType::from_u8(type_byte)?;
        self.descriptor(method)
            .or_else(|| self.descriptors.iter().find(|d| d.wraps == Some(method)))
    }

    /// Inner type wrapped by `method`, if any
    pub fn wraps(&self, method: EapType) -> Option<EapType> {
        self.descriptor(method).and_then(|d| d.wraps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eap::EapPacket;
    use crate::eap::tls::TlsPayload;

    #[test]
    fn test_exact_lookup() {
        let registry = PayloadRegistry::standard();
        assert_eq!(registry.lookup(26).unwrap().method, EapType::MsChapV2);
        assert_eq!(registry.lookup(13).unwrap().method, EapType::Tls);
        assert!(registry.lookup(4).is_none());
    }

    #[test]
    fn test_wrapped_type_routes_to_outer() {
        let registry = PayloadRegistry::new()
            .with(MethodDescriptor::new(EapType::Peap, Payload::decode_tls).wrapping(EapType::Tls));

        assert_eq!(registry.lookup(13).unwrap().method, EapType::Peap);
        assert_eq!(registry.wraps(EapType::Peap), Some(EapType::Tls));

        // A type-13 fragment decodes through the PEAP codec and keeps its literal type
        let bytes = [2, 4, 0, 6, 13, 0x00];
        let packet = EapPacket::decode(&bytes, &registry).unwrap();
        assert_eq!(packet.method_type, Some(EapType::Tls));
        assert_eq!(packet.payload, Some(Payload::Tls(TlsPayload::ack())));
    }

    #[test]
    fn test_register_replaces() {
        let mut registry = PayloadRegistry::standard();
        registry.register(MethodDescriptor::new(EapType::Gtc, Payload::decode_identity));

        let packet = EapPacket::decode(&[2, 1, 0, 7, 6, b'o', b'k'], &registry).unwrap();
        assert_eq!(packet.payload, Some(Payload::Identity("ok".to_string())));
    }
}
