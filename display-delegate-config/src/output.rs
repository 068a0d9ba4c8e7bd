use knuffel::errors::DecodeError;

/// A simulated output for the fake backend.
#[derive(knuffel::Decode, Debug, Clone, PartialEq)]
pub struct FakeOutput {
    #[knuffel(argument)]
    pub name: OutputName,
    #[knuffel(child, unwrap(argument), default)]
    pub connection: ConnectionKind,
    #[knuffel(child)]
    pub physical_size: Option<PhysicalSize>,
    #[knuffel(child, unwrap(argument), default)]
    pub product_id: u32,
    #[knuffel(children(name = "mode"))]
    pub modes: Vec<ModeNode>,
    #[knuffel(child)]
    pub origin: Option<Origin>,
    #[knuffel(child)]
    pub hdcp: bool,
    #[knuffel(child)]
    pub color_correction_matrix: bool,
    #[knuffel(child, default)]
    pub color_profiles: ColorProfiles,
}

impl FakeOutput {
    /// Index of the mode marked `current=true`, if any.
    pub fn current_mode(&self) -> Option<usize> {
        self.modes.iter().position(|m| m.current)
    }

    /// Index of the native mode: the one marked `native=true`, or the first mode.
    pub fn native_mode(&self) -> Option<usize> {
        self.modes
            .iter()
            .position(|m| m.native)
            .or_else(|| (!self.modes.is_empty()).then_some(0))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputName(pub String);

#[derive(knuffel::Decode, Debug, Clone, Copy, PartialEq)]
pub struct ModeNode {
    #[knuffel(argument)]
    pub width: u32,
    #[knuffel(argument)]
    pub height: u32,
    #[knuffel(property, default = 60.)]
    pub refresh: f64,
    #[knuffel(property, default)]
    pub interlaced: bool,
    #[knuffel(property, default)]
    pub current: bool,
    #[knuffel(property, default)]
    pub native: bool,
}

#[derive(knuffel::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhysicalSize {
    #[knuffel(argument)]
    pub width_mm: u32,
    #[knuffel(argument)]
    pub height_mm: u32,
}

#[derive(knuffel::Decode, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Origin {
    #[knuffel(property, default)]
    pub x: i32,
    #[knuffel(property, default)]
    pub y: i32,
}

#[derive(knuffel::Decode, Debug, Default, Clone, PartialEq, Eq)]
pub struct ColorProfiles {
    #[knuffel(arguments)]
    pub profiles: Vec<ColorProfileKind>,
}

#[derive(knuffel::DecodeScalar, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionKind {
    #[default]
    Unknown,
    Internal,
    Vga,
    Hdmi,
    Dvi,
    DisplayPort,
    Network,
}

#[derive(knuffel::DecodeScalar, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorProfileKind {
    Standard,
    Dynamic,
    Movie,
    Reading,
}

impl<S: knuffel::traits::ErrorSpan> knuffel::DecodeScalar<S> for OutputName {
    fn type_check(
        type_name: &Option<knuffel::span::Spanned<knuffel::ast::TypeName, S>>,
        ctx: &mut knuffel::decode::Context<S>,
    ) {
        if let Some(type_name) = &type_name {
            ctx.emit_error(DecodeError::unexpected(
                type_name,
                "type name",
                "no type name expected for this node",
            ));
        }
    }

    fn raw_decode(
        val: &knuffel::span::Spanned<knuffel::ast::Literal, S>,
        ctx: &mut knuffel::decode::Context<S>,
    ) -> Result<OutputName, DecodeError<S>> {
        #[derive(Debug)]
        struct OutputNameSet(Vec<String>);
        match &**val {
            knuffel::ast::Literal::String(ref s) => {
                let mut name_set: Vec<String> = match ctx.get::<OutputNameSet>() {
                    Some(h) => h.0.clone(),
                    None => Vec::new(),
                };

                if name_set.iter().any(|name| name.eq_ignore_ascii_case(s)) {
                    ctx.emit_error(DecodeError::unexpected(
                        val,
                        "output name",
                        format!("duplicate output: {s}"),
                    ));
                    return Ok(Self(String::new()));
                }

                name_set.push(s.to_string());
                ctx.set(OutputNameSet(name_set));
                Ok(Self(s.clone().into()))
            }
            _ => {
                ctx.emit_error(DecodeError::unsupported(
                    val,
                    "output names must be strings",
                ));
                Ok(Self(String::new()))
            }
        }
    }
}
