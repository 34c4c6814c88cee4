use crate::bundling::BundleDescriptor;
use crate::longrunning::LongRunningDescriptor;
use crate::paging::PageDescriptor;
use crate::streaming::StreamDescriptor;

/// Selects the specialized behavior wrapped around a method's raw call.
///
/// Exactly one applies per method. `Stream` requires a streaming raw call;
/// every other variant requires a unary one.
pub enum Descriptor<Req, Res> {
    None,
    Page(PageDescriptor),
    Stream(StreamDescriptor<Req, Res>),
    Bundle(BundleDescriptor),
    LongRunning(LongRunningDescriptor),
}

impl<Req, Res> Descriptor<Req, Res> {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Descriptor::None => "unary",
            Descriptor::Page(_) => "page",
            Descriptor::Stream(_) => "stream",
            Descriptor::Bundle(_) => "bundle",
            Descriptor::LongRunning(_) => "long_running",
        }
    }
}

impl<Req, Res> Default for Descriptor<Req, Res> {
    fn default() -> Self {
        Descriptor::None
    }
}

impl<Req, Res> Clone for Descriptor<Req, Res> {
    fn clone(&self) -> Self {
        match self {
            Descriptor::None => Descriptor::None,
            Descriptor::Page(d) => Descriptor::Page(d.clone()),
            Descriptor::Stream(d) => Descriptor::Stream(d.clone()),
            Descriptor::Bundle(d) => Descriptor::Bundle(d.clone()),
            Descriptor::LongRunning(d) => Descriptor::LongRunning(d.clone()),
        }
    }
}

impl<Req, Res> std::fmt::Debug for Descriptor<Req, Res> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Descriptor::None => f.write_str("None"),
            Descriptor::Page(d) => f.debug_tuple("Page").field(d).finish(),
            Descriptor::Stream(d) => f.debug_tuple("Stream").field(d).finish(),
            Descriptor::Bundle(d) => f.debug_tuple("Bundle").field(d).finish(),
            Descriptor::LongRunning(d) => f.debug_tuple("LongRunning").field(d).finish(),
        }
    }
}

impl<Req, Res> From<PageDescriptor> for Descriptor<Req, Res> {
    fn from(descriptor: PageDescriptor) -> Self {
        Descriptor::Page(descriptor)
    }
}

impl<Req, Res> From<StreamDescriptor<Req, Res>> for Descriptor<Req, Res> {
    fn from(descriptor: StreamDescriptor<Req, Res>) -> Self {
        Descriptor::Stream(descriptor)
    }
}

impl<Req, Res> From<BundleDescriptor> for Descriptor<Req, Res> {
    fn from(descriptor: BundleDescriptor) -> Self {
        Descriptor::Bundle(descriptor)
    }
}

impl<Req, Res> From<LongRunningDescriptor> for Descriptor<Req, Res> {
    fn from(descriptor: LongRunningDescriptor) -> Self {
        Descriptor::LongRunning(descriptor)
    }
}
